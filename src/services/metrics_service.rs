//! Delivery metrics: latency percentiles and success/retry rates computed
//! from attempt history, globally or per organization. Pure read-only
//! projection over the stores.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::DeliveryStatus;
use crate::store::{DeliveryRepository, DlqRepository};

/// A point-in-time metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_deliveries: usize,
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,
    pub dlq_size: usize,
    pub average_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    /// Successful deliveries over total.
    pub success_rate: f64,
    /// Deliveries that needed more than one attempt, over total.
    pub retry_rate: f64,
}

/// Service computing metrics snapshots.
#[derive(Clone)]
pub struct MetricsService {
    deliveries: Arc<dyn DeliveryRepository>,
    dlq_entries: Arc<dyn DlqRepository>,
}

impl MetricsService {
    /// Create a new metrics service.
    #[must_use]
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, dlq_entries: Arc<dyn DlqRepository>) -> Self {
        Self {
            deliveries,
            dlq_entries,
        }
    }

    /// Compute a snapshot over all deliveries, or only those belonging to
    /// one organization.
    pub async fn snapshot(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<MetricsSnapshot, WebhookError> {
        let deliveries: Vec<_> = self
            .deliveries
            .list()
            .await?
            .into_iter()
            .filter(|d| organization_id.map_or(true, |org| d.payload.organization_id == org))
            .collect();

        let dlq_size = match organization_id {
            None => self.dlq_entries.count().await?,
            Some(org) => self
                .dlq_entries
                .list()
                .await?
                .iter()
                .filter(|e| e.payload.organization_id == org)
                .count(),
        };

        let total = deliveries.len();
        let successful = deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Delivered)
            .count();
        let failed = deliveries
            .iter()
            .filter(|d| matches!(d.status, DeliveryStatus::Dlq | DeliveryStatus::Failed))
            .count();
        let retried = deliveries.iter().filter(|d| d.attempts.len() > 1).count();

        let mut latencies: Vec<u64> = deliveries
            .iter()
            .flat_map(|d| d.attempts.iter().filter_map(|a| a.latency_ms))
            .collect();
        latencies.sort_unstable();

        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        Ok(MetricsSnapshot {
            total_deliveries: total,
            successful_deliveries: successful,
            failed_deliveries: failed,
            dlq_size,
            average_latency_ms,
            p95_latency_ms: percentile(&latencies, 95.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            success_rate: rate(successful, total),
            retry_rate: rate(retried, total),
        })
    }
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Nearest-rank percentile over a sorted slice; 0 when empty.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
