//! CLI configuration, argument parsing, and resource inventory loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// RDS/Aurora version upgrade support CLI tool.
///
/// Calculates multi-hop upgrade paths over AWS valid upgrade targets,
/// executes them one step at a time, and tracks progress in a local state
/// file so interrupted runs can be resumed.
#[derive(Parser, Debug, Clone)]
#[command(name = "rup")]
#[command(about = "RDS/Aurora version upgrade support CLI tool")]
#[command(version)]
pub struct Args {
    /// Path to the resource inventory file
    #[arg(long, global = true, default_value = "config.json", env = "RUP_CONFIG")]
    pub config: PathBuf,

    /// Path to the upgrade state file
    #[arg(
        long,
        global = true,
        default_value = "upgrade-state.json",
        env = "RUP_STATE_FILE"
    )]
    pub state_file: PathBuf,

    /// Seconds between poll cycles while monitoring upgrades
    #[arg(long, global = true, default_value = "60", env = "RUP_POLL_INTERVAL")]
    pub interval: u64,

    /// Restrict to a single environment (e.g. dev, prod)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Skip confirmation prompts
    #[arg(short, long, global = true, default_value = "false")]
    pub yes: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUP_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch live engine versions from AWS and display the status table
    List,

    /// Show valid upgrade targets and reachability of configured targets
    Targets,

    /// Calculate upgrade paths without making changes
    Plan,

    /// Plan upgrades, confirm, then execute and monitor until completion
    Upgrade {
        /// Show planned actions without triggering upgrades
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Resume monitoring of pending or in-progress upgrades
    Resume,

    /// Show saved upgrade state (no AWS calls)
    Status,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub state_file: PathBuf,
    pub interval: Duration,
    pub env: Option<String>,
    pub yes: bool,
    pub log_level: String,
    pub command: Command,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            config_path: args.config,
            state_file: args.state_file,
            interval: Duration::from_secs(args.interval),
            env: args.env,
            yes: args.yes,
            log_level: args.log_level,
            command: args.command,
        }
    }
}

/// Kind of managed RDS unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cluster,
    Instance,
}

/// One managed resource from the inventory file. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resource {
    pub arn: String,
    pub name: String,
    pub env: String,
    pub engine: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub target_version: String,
}

impl Resource {
    /// Resource identifier (the last ARN segment).
    pub fn id(&self) -> &str {
        self.arn.rsplit(':').next().unwrap_or(&self.arn)
    }

    /// Region encoded in the ARN.
    pub fn region(&self) -> &str {
        self.arn.split(':').nth(3).unwrap_or_default()
    }

    /// Display label in env/name form.
    pub fn label(&self) -> String {
        format!("{}/{}", self.env, self.name)
    }
}

/// Resource inventory: AWS profile per environment plus the resources to
/// manage and their configured target versions.
#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    pub aws_profiles: HashMap<String, String>,
    pub resources: Vec<Resource>,
}

impl Inventory {
    /// Load and validate the inventory file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("config file not found: {}", path.display()))?;
        let inventory: Inventory = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<()> {
        for resource in &self.resources {
            if !self.aws_profiles.contains_key(&resource.env) {
                bail!(
                    "no AWS profile configured for environment '{}' (resource {})",
                    resource.env,
                    resource.name
                );
            }
            if resource.arn.split(':').count() < 6 {
                bail!("malformed ARN for resource {}: {}", resource.name, resource.arn);
            }
        }
        Ok(())
    }

    /// Resources, optionally restricted to one environment.
    pub fn resources_in(&self, env: Option<&str>) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| env.is_none_or(|e| r.env == e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "aws_profiles": {"dev": "sdc-dev", "prod": "sdc-prod"},
        "resources": [
            {
                "arn": "arn:aws:rds:us-east-1:111122223333:cluster:aurora-edge",
                "name": "aurora-edge",
                "env": "dev",
                "engine": "aurora-postgresql",
                "type": "cluster",
                "target_version": "16.4"
            },
            {
                "arn": "arn:aws:rds:eu-west-1:111122223333:db:legacy-maria",
                "name": "legacy-maria",
                "env": "prod",
                "engine": "mariadb",
                "type": "instance",
                "target_version": "10.11.9"
            }
        ]
    }"#;

    fn sample_inventory() -> Inventory {
        let inventory: Inventory = serde_json::from_str(SAMPLE).unwrap();
        inventory.validate().unwrap();
        inventory
    }

    #[test]
    fn test_parse_inventory() {
        let inventory = sample_inventory();
        assert_eq!(inventory.resources.len(), 2);
        assert_eq!(inventory.aws_profiles.get("dev"), Some(&"sdc-dev".to_string()));
        assert_eq!(inventory.resources[0].kind, ResourceKind::Cluster);
        assert_eq!(inventory.resources[1].kind, ResourceKind::Instance);
    }

    #[test]
    fn test_missing_profiles_key_is_error() {
        let result: Result<Inventory, _> = serde_json::from_str(r#"{"resources": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_without_profile_is_rejected() {
        let raw = SAMPLE.replace("\"prod\": \"sdc-prod\"", "\"staging\": \"sdc-staging\"");
        let inventory: Inventory = serde_json::from_str(&raw).unwrap();
        let err = inventory.validate().unwrap_err();
        assert!(err.to_string().contains("prod"));
    }

    #[test]
    fn test_unknown_resource_kind_is_rejected() {
        let raw = SAMPLE.replace("\"type\": \"cluster\"", "\"type\": \"proxy\"");
        let result: Result<Inventory, _> = serde_json::from_str(&raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_arn_helpers() {
        let inventory = sample_inventory();
        let cluster = &inventory.resources[0];
        assert_eq!(cluster.id(), "aurora-edge");
        assert_eq!(cluster.region(), "us-east-1");
        assert_eq!(cluster.label(), "dev/aurora-edge");

        let instance = &inventory.resources[1];
        assert_eq!(instance.id(), "legacy-maria");
        assert_eq!(instance.region(), "eu-west-1");
    }

    #[test]
    fn test_resources_in_filters_by_env() {
        let inventory = sample_inventory();
        assert_eq!(inventory.resources_in(None).len(), 2);

        let dev = inventory.resources_in(Some("dev"));
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].name, "aurora-edge");

        assert!(inventory.resources_in(Some("qa")).is_empty());
    }

    #[test]
    fn test_config_from_args() {
        let args = Args::parse_from(["rup", "--interval", "5", "--env", "dev", "status"]);
        let config = Config::from_args(args);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.env.as_deref(), Some("dev"));
        assert!(matches!(config.command, Command::Status));
    }
}
