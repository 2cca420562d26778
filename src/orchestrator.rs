//! Per-resource upgrade state machine.
//!
//! Each resource moves `not_started -> pending -> in_progress` and ends in
//! `completed`, `failed` or `skipped`. Every transition is persisted through
//! the state store before the method returns, so a restarted process picks
//! up exactly where the last confirmed transition left off. Credential
//! errors are propagated to the caller *before* any state is written; the
//! poll loop retries them on the next cycle.

use tracing::{error, info, warn};

use crate::config::Resource;
use crate::error::RupError;
use crate::planner::find_upgrade_path;
use crate::provider::{FAILURE_STATUSES, RdsProvider, STATUS_AVAILABLE};
use crate::state::{StatePatch, StateStore, UpgradeState, UpgradeStatus};

/// Result of planning one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Already running the configured target version.
    AlreadyAtTarget { version: String },
    /// No route from the live version to the target.
    NoPath { current: String },
    /// Upgrade path computed (and persisted as pending unless dry-run).
    Planned { current: String, path: Vec<String> },
}

/// Result of polling one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Terminal or untracked; nothing to do.
    Idle,
    /// The current hop has not stabilized yet; expected steady state.
    InFlight { status: String, version: String },
    /// One hop confirmed, the next one triggered.
    HopCompleted { completed: String, next: String },
    /// Final hop confirmed; the resource is fully upgraded.
    Completed { version: String },
    /// The resource reached an unrecoverable state.
    Failed { reason: String },
}

/// Drives a single resource's upgrade using the provider for I/O and the
/// state store as its only memory.
pub struct Orchestrator<'a, P> {
    provider: &'a P,
    store: &'a mut StateStore,
    dry_run: bool,
}

impl<'a, P: RdsProvider> Orchestrator<'a, P> {
    pub fn new(provider: &'a P, store: &'a mut StateStore, dry_run: bool) -> Self {
        Self {
            provider,
            store,
            dry_run,
        }
    }

    /// Stored state for a resource.
    pub fn state(&self, resource: &Resource) -> Option<&UpgradeState> {
        self.store.get(&resource.arn)
    }

    /// Query the live version and compute the upgrade path.
    ///
    /// Transitions to `skipped` when the resource is already at its target,
    /// `failed` when no path exists, and `pending` otherwise. In dry-run
    /// mode the path is still computed and skipped/failed outcomes are still
    /// recorded, but the `pending` transition is not persisted.
    pub async fn plan(&mut self, resource: &Resource) -> Result<PlanOutcome, RupError> {
        let current = self.provider.current_version(resource).await?;

        if current == resource.target_version {
            info!(
                resource = %resource.label(),
                version = %current,
                "Already at target version, skipping"
            );
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Skipped).current_version(&current),
            )?;
            return Ok(PlanOutcome::AlreadyAtTarget { version: current });
        }

        let path =
            find_upgrade_path(self.provider, resource, &current, &resource.target_version).await;

        if path.is_empty() {
            let err = RupError::NoPathFound {
                current: current.clone(),
                target: resource.target_version.clone(),
            };
            error!(resource = %resource.label(), error = %err, "Planning failed");
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Failed)
                    .current_version(&current)
                    .error(err.to_string()),
            )?;
            return Ok(PlanOutcome::NoPath { current });
        }

        if !self.dry_run {
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Pending)
                    .current_version(&current)
                    .target_version(&resource.target_version)
                    .upgrade_path(path.clone())
                    .step_idx(0),
            )?;
        }

        Ok(PlanOutcome::Planned { current, path })
    }

    /// Trigger the first hop of a pending resource.
    ///
    /// No-op unless the resource is `pending`. On success the resource moves
    /// to `in_progress`; an actuation failure moves it to `failed`. A
    /// credential error leaves it `pending` and propagates so the caller can
    /// retry on the next cycle.
    pub async fn start(&mut self, resource: &Resource) -> Result<(), RupError> {
        let Some(state) = self.store.get(&resource.arn) else {
            return Ok(());
        };
        if state.status != UpgradeStatus::Pending {
            return Ok(());
        }

        let Some(first) = state.upgrade_path.first().cloned() else {
            // Unreachable through plan(), but external edits could produce it.
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Failed)
                    .error("pending state has an empty upgrade path"),
            )?;
            return Ok(());
        };

        if self.dry_run {
            info!(
                resource = %resource.label(),
                target = %first,
                "[dry run] Would trigger upgrade"
            );
            return Ok(());
        }

        match self.provider.trigger_upgrade(resource, &first).await {
            Ok(()) => {
                info!(resource = %resource.label(), target = %first, "Upgrade triggered");
                self.store
                    .update(&resource.arn, StatePatch::status(UpgradeStatus::InProgress))?;
                Ok(())
            }
            Err(e) if e.is_transient_auth() => Err(e),
            Err(e) => {
                error!(resource = %resource.label(), error = %e, "Could not start upgrade");
                self.store.update(
                    &resource.arn,
                    StatePatch::status(UpgradeStatus::Failed).error(e.to_string()),
                )?;
                Ok(())
            }
        }
    }

    /// Check an in-progress resource against the live provider status and
    /// advance it when the current hop has stabilized.
    ///
    /// The confirmed version is persisted first, the next hop is triggered
    /// second, and `step_idx` advances only once the trigger was accepted.
    /// A credential error on the trigger leaves `status` and `step_idx`
    /// untouched, so the same hop boundary is retried on the next cycle.
    pub async fn poll(&mut self, resource: &Resource) -> Result<PollOutcome, RupError> {
        let Some(state) = self.store.get(&resource.arn).cloned() else {
            return Ok(PollOutcome::Idle);
        };
        if state.status != UpgradeStatus::InProgress {
            return Ok(PollOutcome::Idle);
        }

        let Some(expected) = state.upgrade_path.get(state.step_idx).cloned() else {
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Failed)
                    .error(format!("step index {} out of range", state.step_idx)),
            )?;
            return Ok(PollOutcome::Failed {
                reason: "step index out of range".to_string(),
            });
        };

        let live = self.provider.live_status(resource).await?;

        if live.status == STATUS_AVAILABLE && live.version == expected {
            self.store
                .update(&resource.arn, StatePatch::default().current_version(&expected))?;

            let next_idx = state.step_idx + 1;
            if next_idx >= state.upgrade_path.len() {
                self.store
                    .update(&resource.arn, StatePatch::status(UpgradeStatus::Completed))?;
                info!(resource = %resource.label(), version = %expected, "Fully upgraded");
                return Ok(PollOutcome::Completed { version: expected });
            }

            let next = state.upgrade_path[next_idx].clone();
            match self.provider.trigger_upgrade(resource, &next).await {
                Ok(()) => {
                    self.store
                        .update(&resource.arn, StatePatch::default().step_idx(next_idx))?;
                    info!(
                        resource = %resource.label(),
                        completed = %expected,
                        next = %next,
                        "Step complete, next hop triggered"
                    );
                    Ok(PollOutcome::HopCompleted {
                        completed: expected,
                        next,
                    })
                }
                Err(e) if e.is_transient_auth() => Err(e),
                Err(e) => {
                    error!(resource = %resource.label(), error = %e, "Could not trigger next hop");
                    self.store.update(
                        &resource.arn,
                        StatePatch::status(UpgradeStatus::Failed).error(e.to_string()),
                    )?;
                    Ok(PollOutcome::Failed {
                        reason: e.to_string(),
                    })
                }
            }
        } else if FAILURE_STATUSES.contains(&live.status.as_str()) {
            let err = RupError::UnexpectedStatus(live.status.clone());
            error!(resource = %resource.label(), status = %live.status, "Upgrade failed");
            self.store.update(
                &resource.arn,
                StatePatch::status(UpgradeStatus::Failed).error(err.to_string()),
            )?;
            Ok(PollOutcome::Failed {
                reason: err.to_string(),
            })
        } else {
            if live.version != expected && state.current_version.as_deref() != Some(&live.version) {
                // Out-of-band change: report it, keep waiting for the
                // expected hop rather than chasing the drifted version.
                warn!(
                    resource = %resource.label(),
                    expected = %expected,
                    live_version = %live.version,
                    "Live version matches neither the last confirmed nor the expected version"
                );
            }
            Ok(PollOutcome::InFlight {
                status: live.status,
                version: live.version,
            })
        }
    }
}
