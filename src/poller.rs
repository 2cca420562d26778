//! Fixed-interval monitoring loop.
//!
//! One tick makes exactly one status round trip per active resource (plus an
//! actuation call when a hop boundary is crossed) and never lets one
//! resource's failure affect its siblings. Resources are processed
//! sequentially; no provider call runs concurrently for two resources.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Resource;
use crate::error::RupError;
use crate::orchestrator::Orchestrator;
use crate::provider::RdsProvider;
use crate::state::UpgradeStatus;

/// Drives every active resource's upgrade forward, one poll cycle at a time.
pub struct PollLoop<'a, P> {
    orchestrator: Orchestrator<'a, P>,
    interval: Duration,
}

impl<'a, P: RdsProvider> PollLoop<'a, P> {
    pub fn new(orchestrator: Orchestrator<'a, P>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Monitor until every resource reaches a terminal status.
    ///
    /// Ctrl-C stops the monitoring process only: upgrades already triggered
    /// keep running on the provider side, and `resume` re-attaches to them.
    pub async fn run(&mut self, resources: &[&Resource]) -> Result<(), RupError> {
        info!("Monitoring upgrades (Ctrl-C stops monitoring; upgrades continue in AWS)");

        loop {
            if self.tick(resources).await? {
                info!("All upgrades reached a terminal state");
                return Ok(());
            }

            debug!(
                interval_seconds = self.interval.as_secs(),
                "Poll cycle complete, sleeping"
            );

            tokio::select! {
                () = sleep(self.interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Monitoring stopped; run 'rup resume' to re-attach");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over all resources, in input order. Returns true when no
    /// resource is left to monitor.
    ///
    /// Per-resource errors are contained here: credential errors are logged
    /// and retried on the next tick, anything else non-fatal skips just that
    /// resource for this tick. Only a persistence failure aborts the loop.
    pub async fn tick(&mut self, resources: &[&Resource]) -> Result<bool, RupError> {
        let mut all_done = true;

        for resource in resources {
            let status = match self.orchestrator.state(resource) {
                Some(state) => state.status,
                None => continue,
            };
            if !status.is_resumable() {
                continue;
            }
            all_done = false;

            let result = match status {
                UpgradeStatus::Pending => self.orchestrator.start(resource).await,
                UpgradeStatus::InProgress => self.orchestrator.poll(resource).await.map(|_| ()),
                _ => Ok(()),
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_transient_auth() => {
                    info!(
                        resource = %resource.label(),
                        error = %e,
                        "Auth token expired, retrying next cycle (credentials refresh out-of-band)"
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        resource = %resource.label(),
                        error = %e,
                        "Poll error, resource skipped for this cycle"
                    );
                }
            }
        }

        Ok(all_done)
    }
}
