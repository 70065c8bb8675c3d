//! Storage boundary for engine state.
//!
//! Deliveries and dead letter entries live behind small repository traits
//! so the engine logic can run unchanged against a durable backing store.
//! The in-memory implementations below are the defaults.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeadLetterEntry, WebhookDelivery};

/// Persistence seam for deliveries.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn insert(&self, delivery: WebhookDelivery) -> Result<(), WebhookError>;
    async fn get(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError>;
    async fn update(&self, delivery: WebhookDelivery) -> Result<(), WebhookError>;
    async fn list(&self) -> Result<Vec<WebhookDelivery>, WebhookError>;
}

/// Persistence seam for dead letter entries.
#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn insert(&self, entry: DeadLetterEntry) -> Result<(), WebhookError>;
    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, WebhookError>;
    async fn update(&self, entry: DeadLetterEntry) -> Result<(), WebhookError>;
    /// Remove an entry; returns whether it existed.
    async fn remove(&self, id: Uuid) -> Result<bool, WebhookError>;
    async fn list(&self) -> Result<Vec<DeadLetterEntry>, WebhookError>;
    async fn count(&self) -> Result<usize, WebhookError>;
}

/// In-memory delivery store keyed by delivery id.
#[derive(Default)]
pub struct InMemoryDeliveryRepository {
    inner: RwLock<HashMap<Uuid, WebhookDelivery>>,
}

impl InMemoryDeliveryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn insert(&self, delivery: WebhookDelivery) -> Result<(), WebhookError> {
        self.inner.write().await.insert(delivery.id, delivery);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookDelivery>, WebhookError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn update(&self, delivery: WebhookDelivery) -> Result<(), WebhookError> {
        let mut map = self.inner.write().await;
        if !map.contains_key(&delivery.id) {
            return Err(WebhookError::Storage(format!(
                "Delivery {} not present for update",
                delivery.id
            )));
        }
        map.insert(delivery.id, delivery);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WebhookDelivery>, WebhookError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }
}

/// In-memory dead letter store keyed by entry id.
#[derive(Default)]
pub struct InMemoryDlqRepository {
    inner: RwLock<HashMap<Uuid, DeadLetterEntry>>,
}

impl InMemoryDlqRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqRepository for InMemoryDlqRepository {
    async fn insert(&self, entry: DeadLetterEntry) -> Result<(), WebhookError> {
        self.inner.write().await.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, WebhookError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn update(&self, entry: DeadLetterEntry) -> Result<(), WebhookError> {
        let mut map = self.inner.write().await;
        if !map.contains_key(&entry.id) {
            return Err(WebhookError::Storage(format!(
                "DLQ entry {} not present for update",
                entry.id
            )));
        }
        map.insert(entry.id, entry);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool, WebhookError> {
        Ok(self.inner.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, WebhookError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize, WebhookError> {
        Ok(self.inner.read().await.len())
    }
}
