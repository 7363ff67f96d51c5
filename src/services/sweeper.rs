use crate::services::broker::AccessBroker;
use crate::services::credentials::CredentialManager;
use crate::services::thumbnails::ThumbnailCache;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodic housekeeping: purges expired capabilities and drops idle
/// per-key locks.
pub struct BackgroundSweeper {
    broker: AccessBroker,
    credentials: Arc<CredentialManager>,
    thumbnails: ThumbnailCache,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundSweeper {
    pub fn new(
        broker: AccessBroker,
        credentials: Arc<CredentialManager>,
        thumbnails: ThumbnailCache,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            credentials,
            thumbnails,
            interval: Duration::from_secs(interval_secs.max(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Capability sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Capability sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    pub async fn sweep_once(&self) {
        match self.broker.sweep_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("🧹 Removed {} expired capabilities", n),
            Err(e) => tracing::error!("Capability sweep failed: {}", e),
        }
        self.credentials.cleanup_locks();
        self.thumbnails.cleanup_locks();
    }
}
