//! Status and reachability table rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::config::Resource;
use crate::state::{StateStore, UpgradeStatus};

/// Row for the upgrade status table.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "ENV")]
    env: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ENGINE")]
    engine: String,
    #[tabled(rename = "CURRENT")]
    current: String,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "UPDATED")]
    updated: String,
}

/// Row for the upgrade target reachability table.
#[derive(Tabled)]
pub struct TargetRow {
    #[tabled(rename = "ENV")]
    pub env: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "ENGINE")]
    pub engine: String,
    #[tabled(rename = "CURRENT")]
    pub current: String,
    #[tabled(rename = "TARGET")]
    pub target: String,
    #[tabled(rename = "DIRECT TARGETS")]
    pub direct: String,
    #[tabled(rename = "REACHABLE")]
    pub reachable: String,
}

/// Human-friendly engine name.
pub fn engine_label(engine: &str) -> &str {
    match engine {
        "aurora-postgresql" => "Aurora PostgreSQL",
        "aurora-mysql" => "Aurora MySQL",
        "mariadb" => "MariaDB",
        "mysql" => "MySQL",
        "postgres" => "PostgreSQL",
        other => other,
    }
}

/// Render an upgrade path as `current -> hop -> ... -> target`.
pub fn format_path(current: &str, path: &[String]) -> String {
    let mut parts = vec![current.to_string()];
    parts.extend(path.iter().cloned());
    parts.join(" -> ")
}

fn status_cell(status: UpgradeStatus) -> String {
    let label = status.to_string();
    match status {
        UpgradeStatus::Completed => label.green().to_string(),
        UpgradeStatus::Failed => label.red().to_string(),
        UpgradeStatus::InProgress => label.yellow().to_string(),
        UpgradeStatus::Pending => label.blue().to_string(),
        UpgradeStatus::Skipped | UpgradeStatus::NotStarted => label.dimmed().to_string(),
    }
}

/// Print the upgrade status of every resource from persisted state.
pub fn print_status_table(resources: &[&Resource], store: &StateStore) {
    let rows: Vec<StatusRow> = resources
        .iter()
        .map(|resource| {
            let state = store.get(&resource.arn);

            let (current, step, status, updated) = match state {
                Some(state) => {
                    let step = if state.upgrade_path.is_empty() {
                        "-".to_string()
                    } else {
                        format!("{}/{}", state.step_idx + 1, state.upgrade_path.len())
                    };
                    (
                        state.current_version.clone().unwrap_or_else(|| "?".to_string()),
                        step,
                        status_cell(state.status),
                        state
                            .last_updated
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default(),
                    )
                }
                None => (
                    "?".to_string(),
                    "-".to_string(),
                    status_cell(UpgradeStatus::NotStarted),
                    String::new(),
                ),
            };

            StatusRow {
                env: resource.env.clone(),
                name: resource.name.clone(),
                engine: engine_label(&resource.engine).to_string(),
                current,
                target: resource.target_version.clone(),
                step,
                status,
                updated,
            }
        })
        .collect();

    if rows.is_empty() {
        println!("No resources configured.");
        return;
    }

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Print the upgrade target reachability table.
pub fn print_targets_table(rows: &[TargetRow]) {
    if rows.is_empty() {
        println!("No resources configured.");
        return;
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_label_known_engines() {
        assert_eq!(engine_label("aurora-postgresql"), "Aurora PostgreSQL");
        assert_eq!(engine_label("mariadb"), "MariaDB");
    }

    #[test]
    fn test_engine_label_passes_through_unknown() {
        assert_eq!(engine_label("oracle-ee"), "oracle-ee");
    }

    #[test]
    fn test_format_path() {
        let path = vec!["10.11".to_string(), "10.18".to_string()];
        assert_eq!(format_path("10.4", &path), "10.4 -> 10.11 -> 10.18");
        assert_eq!(format_path("10.4", &[]), "10.4");
    }
}
