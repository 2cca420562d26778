//! Per-environment AWS session management.
//!
//! Credentials for the named profiles are rewritten by an external refresh
//! helper on a short rotation, so a client is built fresh from the profile
//! on every request instead of being cached for the process lifetime. A
//! cached client would keep serving the expired credentials it was built
//! with.

use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};

use crate::config::Inventory;
use crate::error::RupError;

/// Session settings for one environment.
#[derive(Debug, Clone)]
pub struct Session {
    profile: String,
    region: String,
}

impl Session {
    pub fn new(profile: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            region: region.into(),
        }
    }

    /// Build a fresh RDS client from the named profile.
    pub async fn rds(&self) -> aws_sdk_rds::Client {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(&self.profile)
            .region(Region::new(self.region.clone()))
            .load()
            .await;
        aws_sdk_rds::Client::new(&config)
    }
}

/// One [`Session`] per environment from the inventory.
#[derive(Debug, Clone)]
pub struct SessionMap {
    sessions: HashMap<String, Session>,
}

impl SessionMap {
    /// Derive a session per environment. The region comes from the first
    /// resource ARN in that environment (environments are single-region).
    pub fn from_inventory(inventory: &Inventory) -> Self {
        let sessions = inventory
            .aws_profiles
            .iter()
            .map(|(env, profile)| {
                let region = inventory
                    .resources
                    .iter()
                    .find(|r| r.env == *env)
                    .map(|r| r.region().to_string())
                    .unwrap_or_else(|| "us-east-1".to_string());
                (env.clone(), Session::new(profile, region))
            })
            .collect();

        Self { sessions }
    }

    pub fn for_env(&self, env: &str) -> Result<&Session, RupError> {
        self.sessions.get(env).ok_or_else(|| RupError::Api {
            scope: "session".to_string(),
            message: format!("no AWS profile configured for environment '{env}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        serde_json::from_str(
            r#"{
                "aws_profiles": {"dev": "sdc-dev", "tools": "sdc-tools"},
                "resources": [
                    {
                        "arn": "arn:aws:rds:ap-northeast-2:111122223333:cluster:edge",
                        "name": "edge",
                        "env": "dev",
                        "engine": "aurora-postgresql",
                        "type": "cluster",
                        "target_version": "16.4"
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_region_derived_from_resource_arn() {
        let sessions = SessionMap::from_inventory(&inventory());
        let session = sessions.for_env("dev").unwrap();
        assert_eq!(session.region, "ap-northeast-2");
        assert_eq!(session.profile, "sdc-dev");
    }

    #[test]
    fn test_env_without_resources_falls_back_to_default_region() {
        let sessions = SessionMap::from_inventory(&inventory());
        let session = sessions.for_env("tools").unwrap();
        assert_eq!(session.region, "us-east-1");
    }

    #[test]
    fn test_unknown_env_is_an_error() {
        let sessions = SessionMap::from_inventory(&inventory());
        assert!(sessions.for_env("prod").is_err());
    }
}
