//! Shared types for the notification relay.
//!
//! This crate defines the recipient, delivery record and delivery report
//! structures plus the strongly-typed error enums shared across the
//! workspace.

pub mod error;
pub mod outcome;
pub mod recipient;
pub mod record;

/// Re-export of all error types.
pub use error::*;
/// Re-export of channel outcome and engine report types.
pub use outcome::{DeliveryReport, FailedAttempt, Outcome};
/// Re-export of recipient identity types.
pub use recipient::{Recipient, RecipientId};
/// Re-export of the persisted delivery record and its state machine.
pub use record::{DeliveryId, DeliveryRecord, DeliveryStatus, DeliveryUpdate};
