//! Persistence collaborators used by the engine and the retry envelope.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use proto::{DatabaseError, DeliveryId, DeliveryRecord, DeliveryUpdate, Recipient, RecipientId};

/// Durable storage for delivery records.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persists a new record and returns its handle.
    async fn create(&self, record: &DeliveryRecord) -> Result<DeliveryId, DatabaseError>;

    /// Applies a terminal update to a `pending` record.
    async fn update(&self, id: &DeliveryId, update: &DeliveryUpdate) -> Result<(), DatabaseError>;

    /// Loads one record.
    async fn get(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>, DatabaseError>;

    /// Most recently created records first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DatabaseError>;
}

/// Resolves recipient ids to contact details.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Returns `None` when the recipient does not exist.
    async fn find(&self, id: &RecipientId) -> Result<Option<Recipient>, DatabaseError>;
}

/// In-process store, for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deliveries: Mutex<Vec<DeliveryRecord>>,
    recipients: Mutex<HashMap<RecipientId, Recipient>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a recipient.
    pub fn insert_recipient(&self, recipient: Recipient) {
        self.recipients
            .lock()
            .insert(recipient.id.clone(), recipient);
    }

    /// Removes a recipient.
    pub fn remove_recipient(&self, id: &RecipientId) {
        self.recipients.lock().remove(id);
    }

    /// All records in creation order.
    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn create(&self, record: &DeliveryRecord) -> Result<DeliveryId, DatabaseError> {
        self.deliveries.lock().push(record.clone());
        Ok(record.id.clone())
    }

    async fn update(&self, id: &DeliveryId, update: &DeliveryUpdate) -> Result<(), DatabaseError> {
        let mut deliveries = self.deliveries.lock();
        let record = deliveries
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        record
            .apply(update.clone())
            .map_err(|_| DatabaseError::AlreadyTerminal(id.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>, DatabaseError> {
        Ok(self.deliveries.lock().iter().find(|r| &r.id == id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<DeliveryRecord>, DatabaseError> {
        let mut records = self.records();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn find(&self, id: &RecipientId) -> Result<Option<Recipient>, DatabaseError> {
        Ok(self.recipients.lock().get(id).cloned())
    }
}
