//! AWS RDS implementation of the provider seam.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{Inventory, Resource, ResourceKind};
use crate::error::RupError;
use crate::provider::{LiveStatus, RdsProvider};
use crate::rds::session::SessionMap;

/// RDS client wrapper for cluster and instance upgrade operations.
///
/// Holds only session settings; the underlying SDK client is rebuilt per
/// call so rotated profile credentials are always picked up.
#[derive(Debug, Clone)]
pub struct RdsClient {
    sessions: SessionMap,
}

impl RdsClient {
    pub fn new(inventory: &Inventory) -> Self {
        Self {
            sessions: SessionMap::from_inventory(inventory),
        }
    }

    async fn client_for(&self, resource: &Resource) -> Result<aws_sdk_rds::Client, RupError> {
        Ok(self.sessions.for_env(&resource.env)?.rds().await)
    }
}

#[async_trait]
impl RdsProvider for RdsClient {
    async fn current_version(&self, resource: &Resource) -> Result<String, RupError> {
        let status = self.live_status(resource).await?;
        Ok(status.version)
    }

    async fn upgrade_targets(
        &self,
        resource: &Resource,
        version: &str,
    ) -> Result<Vec<String>, RupError> {
        debug!(
            engine = %resource.engine,
            version = %version,
            "Fetching valid upgrade targets"
        );

        let client = self.client_for(resource).await?;
        let resp = client
            .describe_db_engine_versions()
            .engine(&resource.engine)
            .engine_version(version)
            .send()
            .await
            .map_err(|e| {
                let api = RupError::api("rds::describe_db_engine_versions", e);
                if api.is_transient_auth() {
                    api
                } else {
                    RupError::DirectoryQuery {
                        engine: resource.engine.clone(),
                        version: version.to_string(),
                        message: api.to_string(),
                    }
                }
            })?;

        let mut targets = Vec::new();
        for engine_version in resp.db_engine_versions() {
            for target in engine_version.valid_upgrade_target() {
                if let Some(v) = target.engine_version() {
                    targets.push(v.to_string());
                }
            }
        }

        Ok(targets)
    }

    async fn trigger_upgrade(
        &self,
        resource: &Resource,
        target_version: &str,
    ) -> Result<(), RupError> {
        info!(
            resource = %resource.label(),
            target = %target_version,
            "Triggering engine version upgrade"
        );

        let client = self.client_for(resource).await?;
        let result = match resource.kind {
            ResourceKind::Cluster => client
                .modify_db_cluster()
                .db_cluster_identifier(resource.id())
                .engine_version(target_version)
                .apply_immediately(true)
                .allow_major_version_upgrade(true)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| RupError::api("rds::modify_db_cluster", e)),
            ResourceKind::Instance => client
                .modify_db_instance()
                .db_instance_identifier(resource.id())
                .engine_version(target_version)
                .apply_immediately(true)
                .allow_major_version_upgrade(true)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| RupError::api("rds::modify_db_instance", e)),
        };

        result.map_err(|e| {
            if e.is_transient_auth() {
                e
            } else {
                RupError::Actuation {
                    target: target_version.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    async fn live_status(&self, resource: &Resource) -> Result<LiveStatus, RupError> {
        let client = self.client_for(resource).await?;

        match resource.kind {
            ResourceKind::Cluster => {
                let resp = client
                    .describe_db_clusters()
                    .db_cluster_identifier(resource.id())
                    .send()
                    .await
                    .map_err(|e| RupError::api("rds::describe_db_clusters", e))?;

                let cluster = resp.db_clusters().first().ok_or_else(|| RupError::Api {
                    scope: "rds::describe_db_clusters".to_string(),
                    message: format!("cluster {} not found", resource.id()),
                })?;

                Ok(LiveStatus {
                    status: cluster.status().unwrap_or_default().to_string(),
                    version: cluster.engine_version().unwrap_or_default().to_string(),
                })
            }
            ResourceKind::Instance => {
                let resp = client
                    .describe_db_instances()
                    .db_instance_identifier(resource.id())
                    .send()
                    .await
                    .map_err(|e| RupError::api("rds::describe_db_instances", e))?;

                let instance = resp.db_instances().first().ok_or_else(|| RupError::Api {
                    scope: "rds::describe_db_instances".to_string(),
                    message: format!("instance {} not found", resource.id()),
                })?;

                Ok(LiveStatus {
                    status: instance.db_instance_status().unwrap_or_default().to_string(),
                    version: instance.engine_version().unwrap_or_default().to_string(),
                })
            }
        }
    }
}
