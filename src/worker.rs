//! Background processor: periodically drains due retries and runs
//! opportunistic dead letter expiry sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::delivery_service::DeliveryService;
use crate::services::dlq_service::DlqService;

/// Chance per tick of running a DLQ expiry sweep.
const PURGE_PROBABILITY: f64 = 0.01;

/// Periodic loop driving retry draining and DLQ purges.
pub struct BackgroundProcessor {
    delivery: Arc<DeliveryService>,
    dlq: Arc<DlqService>,
    tick_interval: Duration,
}

impl BackgroundProcessor {
    /// Create a processor ticking at the given interval.
    #[must_use]
    pub fn new(
        delivery: Arc<DeliveryService>,
        dlq: Arc<DlqService>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            delivery,
            dlq,
            tick_interval,
        }
    }

    /// Spawn the processing loop onto the runtime.
    #[must_use]
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            target: "webhook_worker",
            interval_ms = self.tick_interval.as_millis() as u64,
            "Background processor started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(target: "webhook_worker", "Background processor stopped");
    }

    async fn tick(&self) {
        let drained = self.delivery.process_due_retries(Utc::now()).await;
        if drained > 0 {
            tracing::debug!(
                target: "webhook_worker",
                drained,
                "Processed due retries"
            );
        }

        if rand::thread_rng().gen::<f64>() < PURGE_PROBABILITY {
            if let Err(e) = self.dlq.purge_expired().await {
                tracing::error!(
                    target: "webhook_worker",
                    error = %e,
                    "DLQ purge sweep failed"
                );
            }
        }
    }
}

/// Handle to a running background processor.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the processor to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    /// Whether the processing loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
