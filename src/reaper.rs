//! Claim reaper: expires claims whose worker never reported back.
//!
//! Without it a crashed worker leaves its action `taken` forever. The
//! reaper moves such claims to `timeout` and, if configured, requeues them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, stale_cutoff};
use crate::error::{Error, Result};
use crate::model::action::Action;

/// Configuration for the reaper loop.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Age after which a `taken` action counts as abandoned.
    pub claim_timeout: Duration,
    /// Time between sweeps.
    pub interval: Duration,
    /// Requeue expired actions so another worker can take them.
    pub requeue_expired: bool,
}

impl ReaperConfig {
    pub fn new(claim_timeout: Duration) -> Self {
        Self {
            claim_timeout,
            interval: Duration::from_secs(30),
            requeue_expired: false,
        }
    }
}

/// Periodic sweep over stale claims. Safe to run in several processes at
/// once: every expiry is a conditional transition, so each claim is expired
/// by at most one reaper.
#[derive(Clone)]
pub struct ClaimReaper {
    dispatcher: Dispatcher,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
}

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired: Vec<Action>,
    pub requeued: usize,
}

impl ClaimReaper {
    pub fn new(dispatcher: Dispatcher, config: ReaperConfig) -> Result<Self> {
        if config.claim_timeout.is_zero() {
            return Err(Error::Config("claim timeout must be positive".to_string()));
        }
        if let Err(e) = stale_cutoff(config.claim_timeout) {
            return Err(Error::Config(e.to_string()));
        }
        if config.interval.is_zero() {
            return Err(Error::Config("reaper interval must be positive".to_string()));
        }
        Ok(Self {
            dispatcher,
            config,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Signal the loop to stop after the current sweep.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Expire stale claims once, requeueing them if configured.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let expired = self
            .dispatcher
            .expire_stale(self.config.claim_timeout)
            .await?;

        let mut requeued = 0;
        if self.config.requeue_expired {
            for action in &expired {
                match self.dispatcher.requeue(action.id).await {
                    Ok(_) => requeued += 1,
                    // Someone else already requeued or deleted it.
                    Err(Error::InvalidTransition { .. } | Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(SweepReport { expired, requeued })
    }

    /// Sweep every `interval` until [`ClaimReaper::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            claim_timeout_secs = self.config.claim_timeout.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            requeue = self.config.requeue_expired,
            "claim reaper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("claim reaper shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.sweep().await {
                Ok(report) if !report.expired.is_empty() => {
                    warn!(
                        expired = report.expired.len(),
                        requeued = report.requeued,
                        "expired abandoned claims"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("reaper sweep failed: {e}"),
            }
        }
    }
}
