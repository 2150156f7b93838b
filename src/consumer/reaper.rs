//! Resets events stuck in `processing` after a worker crash

use crate::config::ConsumerConfig;
use crate::error::Result;
use crate::meta::MetaDb;
use crate::shutdown::{is_requested, sleep_or_stop, ShutdownRx};
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Reaper {
    db: MetaDb,
    stale_after: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(config: &ConsumerConfig, db: MetaDb) -> Self {
        Self {
            db,
            stale_after: Duration::from_secs(config.stale_after_secs),
            interval: Duration::from_secs(config.reaper_interval_secs.max(1)),
        }
    }

    /// Return every claim older than the stale threshold to `pending`.
    ///
    /// Reset events are republished by the relay on its next pass.
    pub async fn sweep(&self) -> Result<u64> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let reset = self
            .db
            .reset_stale_processing(Utc::now() - stale_after)
            .await?;
        if reset > 0 {
            info!(count = reset, "Reset stale processing events");
        }
        Ok(reset)
    }

    pub async fn run(&self, mut shutdown: ShutdownRx) -> Result<()> {
        while !is_requested(&shutdown) {
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "Reaper sweep failed");
            }
            if sleep_or_stop(self.interval, &mut shutdown).await {
                break;
            }
        }
        Ok(())
    }
}
