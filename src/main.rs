//! rup - RDS/Aurora version upgrade support CLI tool.
//!
//! Upgrades RDS and Aurora resources to their configured target versions:
//! - Automatic intermediate-version path calculation over AWS valid upgrade targets
//! - Crash-resilient progress tracking with resume support across sessions
//! - Upgrade monitoring tolerant of externally rotated credentials
//! - Dry-run mode

mod config;
mod error;
mod orchestrator;
mod output;
mod planner;
mod poller;
mod provider;
mod rds;
mod state;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use dialoguer::Confirm;
use tracing::{error, warn};

use config::{Args, Command, Config, Inventory, Resource};
use orchestrator::{Orchestrator, PlanOutcome};
use output::TargetRow;
use planner::find_upgrade_path;
use poller::PollLoop;
use provider::RdsProvider;
use rds::client::RdsClient;
use state::{StatePatch, StateStore, UpgradeStatus};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&config).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    let inventory = Inventory::load(&config.config_path)?;
    let mut store = StateStore::open(&config.state_file);
    let resources = inventory.resources_in(config.env.as_deref());
    let provider = RdsClient::new(&inventory);

    match &config.command {
        Command::List => cmd_list(&provider, &resources, &mut store).await,
        Command::Targets => cmd_targets(&provider, &resources).await,
        Command::Plan => cmd_plan(&provider, &resources, &mut store).await,
        Command::Upgrade { dry_run } => {
            cmd_upgrade(&provider, &resources, &mut store, config, *dry_run).await
        }
        Command::Resume => cmd_resume(&provider, &resources, &mut store, config).await,
        Command::Status => {
            output::print_status_table(&resources, &store);
            Ok(())
        }
    }
}

/// Fetch live engine versions, record them, and show the status table.
async fn cmd_list(
    provider: &RdsClient,
    resources: &[&Resource],
    store: &mut StateStore,
) -> Result<()> {
    println!("{}", "Fetching live versions from AWS...".bold());

    for resource in resources {
        match provider.current_version(resource).await {
            Ok(version) => {
                store.update(
                    &resource.arn,
                    StatePatch::default()
                        .current_version(&version)
                        .target_version(&resource.target_version),
                )?;
                println!("  {}: {}", resource.label(), version);
            }
            Err(e) if e.is_transient_auth() => {
                println!(
                    "  {}",
                    format!(
                        "{}: auth error, credentials may need renewal",
                        resource.label()
                    )
                    .yellow()
                );
            }
            Err(e) => println!("  {}", format!("{}: {e}", resource.label()).red()),
        }
    }

    println!();
    output::print_status_table(resources, store);
    Ok(())
}

/// Show direct upgrade targets and reachability of the configured targets.
async fn cmd_targets(provider: &RdsClient, resources: &[&Resource]) -> Result<()> {
    println!("{}", "Querying valid upgrade targets from AWS...".bold());

    let mut rows = Vec::new();
    for resource in resources {
        let (current, direct, reachable) = match provider.current_version(resource).await {
            Ok(current) => {
                let mut direct = match provider.upgrade_targets(resource, &current).await {
                    Ok(targets) => targets,
                    Err(e) => {
                        warn!(
                            resource = %resource.label(),
                            error = %e,
                            "Could not fetch direct upgrade targets"
                        );
                        Vec::new()
                    }
                };
                direct.sort();

                let reachable = if current == resource.target_version {
                    "already there".green().to_string()
                } else if direct.contains(&resource.target_version) {
                    "direct".green().to_string()
                } else {
                    let path =
                        find_upgrade_path(provider, resource, &current, &resource.target_version)
                            .await;
                    if path.is_empty() {
                        "no path found".red().to_string()
                    } else {
                        let hop_word = if path.len() == 1 { "hop" } else { "hops" };
                        format!(
                            "{} {}: {}",
                            path.len(),
                            hop_word,
                            output::format_path(&current, &path)
                        )
                        .yellow()
                        .to_string()
                    }
                };

                let direct = if direct.is_empty() {
                    "none".to_string()
                } else {
                    direct.join(", ")
                };
                (current, direct, reachable)
            }
            Err(e) if e.is_transient_auth() => (
                "?".to_string(),
                "auth error".yellow().to_string(),
                "unknown".to_string(),
            ),
            Err(_) => (
                "?".to_string(),
                "error".red().to_string(),
                "unknown".to_string(),
            ),
        };

        rows.push(TargetRow {
            env: resource.env.clone(),
            name: resource.name.clone(),
            engine: output::engine_label(&resource.engine).to_string(),
            current,
            target: resource.target_version.clone(),
            direct,
            reachable,
        });
    }

    output::print_targets_table(&rows);
    Ok(())
}

/// Plan one pass over the given resources, printing each outcome. Returns
/// the resources that have an executable upgrade path.
async fn plan_resources<'r>(
    provider: &RdsClient,
    resources: &[&'r Resource],
    store: &mut StateStore,
    dry_run: bool,
) -> Result<Vec<&'r Resource>> {
    let mut orch = Orchestrator::new(provider, store, dry_run);
    let mut planned = Vec::new();

    for resource in resources {
        match orch.plan(resource).await {
            Ok(PlanOutcome::AlreadyAtTarget { version }) => {
                println!(
                    "  {}",
                    format!("{} already at {} (target)", resource.label(), version).green()
                );
            }
            Ok(PlanOutcome::NoPath { current }) => {
                println!(
                    "  {}",
                    format!(
                        "{} no upgrade path found: {} -> {}",
                        resource.label(),
                        current,
                        resource.target_version
                    )
                    .red()
                );
            }
            Ok(PlanOutcome::Planned { current, path }) => {
                println!(
                    "  {}: {}",
                    resource.label(),
                    output::format_path(&current, &path)
                );
                planned.push(*resource);
            }
            Err(e) if e.is_transient_auth() => {
                println!(
                    "  {}",
                    format!("{} auth error, skipping", resource.label()).yellow()
                );
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                println!("  {}", format!("{} planning error: {e}", resource.label()).red());
            }
        }
    }

    Ok(planned)
}

/// Calculate and display upgrade paths without persisting pending state.
async fn cmd_plan(
    provider: &RdsClient,
    resources: &[&Resource],
    store: &mut StateStore,
) -> Result<()> {
    println!("{}", "Calculating upgrade paths...".bold());
    let planned = plan_resources(provider, resources, store, true).await?;

    if planned.is_empty() {
        println!("{}", "Nothing to upgrade.".yellow());
    }
    Ok(())
}

/// Plan, confirm, execute, and monitor upgrades.
async fn cmd_upgrade(
    provider: &RdsClient,
    resources: &[&Resource],
    store: &mut StateStore,
    config: &Config,
    dry_run: bool,
) -> Result<()> {
    let prefix = if dry_run { "[dry run] " } else { "" };
    println!("{}", format!("{prefix}Calculating upgrade paths...").bold());

    let planned = plan_resources(provider, resources, store, dry_run).await?;

    if planned.is_empty() {
        println!("{}", "Nothing to upgrade.".yellow());
        return Ok(());
    }

    if dry_run {
        println!("{}", "[dry run] No changes were made.".cyan());
        return Ok(());
    }

    if !config.yes {
        println!();
        let confirmed = Confirm::new()
            .with_prompt(format!("Proceed with {} upgrade(s)?", planned.len()))
            .default(false)
            .interact()?;

        if !confirmed {
            // Roll the freshly planned resources back so an aborted run
            // leaves nothing half-armed.
            for resource in &planned {
                if store
                    .get(&resource.arn)
                    .is_some_and(|s| s.status == UpgradeStatus::Pending)
                {
                    store.update(&resource.arn, StatePatch::status(UpgradeStatus::NotStarted))?;
                }
            }
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    let orch = Orchestrator::new(provider, store, false);
    PollLoop::new(orch, config.interval).run(&planned).await?;
    Ok(())
}

/// Resume monitoring of pending or in-progress upgrades from saved state.
async fn cmd_resume(
    provider: &RdsClient,
    resources: &[&Resource],
    store: &mut StateStore,
    config: &Config,
) -> Result<()> {
    store.reload();

    let resumable: Vec<&Resource> = resources
        .iter()
        .copied()
        .filter(|r| store.get(&r.arn).is_some_and(|s| s.status.is_resumable()))
        .collect();

    if !store.has_resumable() || resumable.is_empty() {
        println!("{}", "No pending or in-progress upgrades to resume.".yellow());
        return Ok(());
    }

    println!("{}", format!("Resuming {} upgrade(s):", resumable.len()).bold());
    for resource in &resumable {
        if let Some(state) = store.get(&resource.arn) {
            let remaining = state.upgrade_path.get(state.step_idx..).unwrap_or_default();
            let from = state.current_version.as_deref().unwrap_or("?");
            println!(
                "  {}: {}",
                resource.label(),
                output::format_path(from, remaining)
            );
        }
    }

    if !config.yes {
        println!();
        let confirmed = Confirm::new()
            .with_prompt("Resume monitoring these upgrades?")
            .default(true)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    let orch = Orchestrator::new(provider, store, false);
    PollLoop::new(orch, config.interval).run(&resumable).await?;
    Ok(())
}
