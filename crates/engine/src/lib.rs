//! Ordered-fallback delivery engine and its persistence collaborators.

pub mod clock;
pub mod fallback;
pub mod sqlite;
pub mod store;

/// Time sources injected into the engine.
pub use clock::{Clock, ManualClock, SystemClock};
/// The fallback engine and its per-run result.
pub use fallback::{Delivery, FallbackEngine};
/// SQLite-backed delivery store and recipient directory.
pub use sqlite::SqliteStore;
/// Persistence traits and the in-memory implementation.
pub use store::{DeliveryStore, MemoryStore, RecipientDirectory};
