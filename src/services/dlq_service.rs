//! Dead letter queue service.
//!
//! Manages deliveries that exhausted their retries or failed non-retryably:
//! filtered listing, single and bulk re-drive, and TTL-based expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeadLetterEntry, DeliveryStatus, WebhookDelivery};
use crate::services::delivery_service::DeliveryService;
use crate::services::event_publisher::{DeliveryEvent, EventPublisher};
use crate::store::DlqRepository;

/// Re-drive attempts allowed per entry before `can_retry` is forced false.
pub const MAX_REDRIVE_ATTEMPTS: u32 = 3;

/// Filter for DLQ listings and bulk re-drives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DlqFilter {
    pub organization_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub can_retry: Option<bool>,
    /// Only entries created at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl DlqFilter {
    fn matches(&self, entry: &DeadLetterEntry) -> bool {
        if let Some(org) = self.organization_id {
            if entry.payload.organization_id != org {
                return false;
            }
        }
        if let Some(ref event_type) = self.event_type {
            if &entry.payload.event_type != event_type {
                return false;
            }
        }
        if let Some(can_retry) = self.can_retry {
            if entry.can_retry != can_retry {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }
        true
    }
}

/// Outcome of a bulk re-drive.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BulkRetryOutcome {
    pub successful: usize,
    pub failed: usize,
}

/// Service for managing dead letter queue entries.
#[derive(Clone)]
pub struct DlqService {
    entries: Arc<dyn DlqRepository>,
    delivery: Arc<DeliveryService>,
    publisher: EventPublisher,
}

impl DlqService {
    /// Create a new DLQ service.
    #[must_use]
    pub fn new(
        entries: Arc<dyn DlqRepository>,
        delivery: Arc<DeliveryService>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            entries,
            delivery,
            publisher,
        }
    }

    /// List entries matching the filter, newest first.
    pub async fn list(&self, filter: &DlqFilter) -> Result<Vec<DeadLetterEntry>, WebhookError> {
        let mut entries: Vec<DeadLetterEntry> = self
            .entries
            .list()
            .await?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Look up a single entry.
    pub async fn get(&self, entry_id: Uuid) -> Result<Option<DeadLetterEntry>, WebhookError> {
        self.entries.get(entry_id).await
    }

    /// Current number of entries in the store.
    pub async fn size(&self) -> Result<usize, WebhookError> {
        self.entries.count().await
    }

    /// Re-drive a single entry as a brand-new delivery.
    ///
    /// The entry is removed when the new delivery succeeds on its
    /// synchronous first attempt; otherwise its retry budget shrinks, and
    /// the new delivery continues through its own lifecycle (it may
    /// dead-letter again as a fresh entry).
    pub async fn retry(&self, entry_id: Uuid) -> Result<WebhookDelivery, WebhookError> {
        let mut entry = self
            .entries
            .get(entry_id)
            .await?
            .ok_or(WebhookError::DlqEntryNotFound)?;

        if !entry.can_retry {
            return Err(WebhookError::DlqEntryNotRetryable);
        }

        let delivery = self.delivery.submit(entry.payload.clone()).await?;

        if delivery.status == DeliveryStatus::Delivered {
            self.entries.remove(entry_id).await?;
            tracing::info!(
                target: "dlq",
                dlq_id = %entry_id,
                delivery_id = %delivery.id,
                "DLQ entry re-driven successfully and removed"
            );
        } else {
            entry.retry_count += 1;
            if entry.retry_count >= MAX_REDRIVE_ATTEMPTS {
                entry.can_retry = false;
            }
            self.entries.update(entry.clone()).await?;
            tracing::warn!(
                target: "dlq",
                dlq_id = %entry_id,
                delivery_id = %delivery.id,
                retry_count = entry.retry_count,
                can_retry = entry.can_retry,
                "DLQ re-drive did not deliver"
            );
        }

        Ok(delivery)
    }

    /// Re-drive all retryable entries matching the filter.
    ///
    /// Entries whose retry budget is already spent are skipped. Returns
    /// counts of re-drives that delivered vs those that did not.
    pub async fn bulk_retry(&self, filter: &DlqFilter) -> Result<BulkRetryOutcome, WebhookError> {
        let candidates = self.list(filter).await?;
        let mut outcome = BulkRetryOutcome::default();

        for entry in candidates.into_iter().filter(|e| e.can_retry) {
            match self.retry(entry.id).await {
                Ok(delivery) if delivery.status == DeliveryStatus::Delivered => {
                    outcome.successful += 1;
                }
                Ok(_) => {
                    outcome.failed += 1;
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        target: "dlq",
                        dlq_id = %entry.id,
                        error = %e,
                        "Failed to re-drive DLQ entry"
                    );
                }
            }
        }

        tracing::info!(
            target: "dlq",
            successful = outcome.successful,
            failed = outcome.failed,
            "Bulk DLQ re-drive finished"
        );

        Ok(outcome)
    }

    /// Delete every entry past its expiry timestamp.
    ///
    /// Returns the number of entries purged.
    pub async fn purge_expired(&self) -> Result<usize, WebhookError> {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .entries
            .list()
            .await?
            .into_iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.id)
            .collect();

        let mut purged = Vec::new();
        for id in expired {
            if self.entries.remove(id).await? {
                purged.push(id);
            }
        }

        if !purged.is_empty() {
            tracing::info!(
                target: "dlq",
                count = purged.len(),
                "Expired DLQ entries purged"
            );
            self.publisher.publish(DeliveryEvent::DlqPurged {
                entry_ids: purged.clone(),
                timestamp: now,
            });
        }

        Ok(purged.len())
    }
}
