//! Provider-side API seam for upgrade orchestration.
//!
//! The upgrade core only talks to AWS through [`RdsProvider`]; the production
//! implementation lives in `rds::client` and tests substitute a scripted
//! in-memory provider.

use async_trait::async_trait;

use crate::config::Resource;
use crate::error::RupError;

/// Live status snapshot of a resource as reported by AWS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    pub status: String,
    pub version: String,
}

/// Provider status meaning the resource has stabilized after an upgrade step.
pub const STATUS_AVAILABLE: &str = "available";

/// Provider statuses meaning the resource is in an unrecoverable state.
pub const FAILURE_STATUSES: &[&str] = &[
    "failed",
    "restore-error",
    "inaccessible-encryption-credentials",
];

/// RDS API surface the upgrade core depends on.
#[async_trait]
pub trait RdsProvider: Send + Sync {
    /// Live engine version of the resource.
    async fn current_version(&self, resource: &Resource) -> Result<String, RupError>;

    /// Valid next versions reachable in one upgrade hop from `version` for
    /// the resource's engine. Queried lazily, one call per version node.
    async fn upgrade_targets(
        &self,
        resource: &Resource,
        version: &str,
    ) -> Result<Vec<String>, RupError>;

    /// Begin an asynchronous provider-side upgrade of a single hop. Returns
    /// once AWS has accepted the modification; completion is observed later
    /// via [`RdsProvider::live_status`].
    async fn trigger_upgrade(
        &self,
        resource: &Resource,
        target_version: &str,
    ) -> Result<(), RupError>;

    /// Current provider status and live engine version.
    async fn live_status(&self, resource: &Resource) -> Result<LiveStatus, RupError>;
}
