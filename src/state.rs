//! Persistent upgrade state for crash resilience and resume support.
//!
//! Progress is kept in a single JSON document keyed by resource ARN. Every
//! mutation rewrites the whole document through a write-to-temp-then-rename
//! sequence, so a crash between two updates loses at most the latest
//! mutation and can never leave a half-written file behind. An unreadable
//! document degrades to an empty store with a warning instead of failing.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RupError;

/// Upgrade lifecycle status of a single resource.
///
/// `completed`, `failed` and `skipped` are terminal; the orchestrator
/// performs no further transitions once one of them is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    #[default]
    NotStarted,
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl UpgradeStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// True for states that an interrupted run can pick back up.
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Persisted upgrade progress for one resource.
///
/// `upgrade_path` holds the versions to move through, excluding the starting
/// version and including the target; `step_idx` points at the hop currently
/// in flight or just confirmed. Unknown fields in the document are ignored
/// on load so newer writers can add fields without breaking older readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeState {
    #[serde(default)]
    pub status: UpgradeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_path: Vec<String>,

    #[serde(default)]
    pub step_idx: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Field-level merge applied by [`StateStore::update`]. Only fields that are
/// set are written; everything else keeps its stored value.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub status: Option<UpgradeStatus>,
    pub current_version: Option<String>,
    pub target_version: Option<String>,
    pub upgrade_path: Option<Vec<String>>,
    pub step_idx: Option<usize>,
    pub error: Option<String>,
}

impl StatePatch {
    pub fn status(status: UpgradeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn current_version(mut self, version: &str) -> Self {
        self.current_version = Some(version.to_string());
        self
    }

    pub fn target_version(mut self, version: &str) -> Self {
        self.target_version = Some(version.to_string());
        self
    }

    pub fn upgrade_path(mut self, path: Vec<String>) -> Self {
        self.upgrade_path = Some(path);
        self
    }

    pub fn step_idx(mut self, idx: usize) -> Self {
        self.step_idx = Some(idx);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    upgrades: BTreeMap<String, UpgradeState>,
}

/// Durable store of per-resource upgrade progress.
///
/// The orchestrator is the only writer; this type has no business logic
/// beyond merge-and-persist.
pub struct StateStore {
    path: PathBuf,
    doc: StateDocument,
}

impl StateStore {
    /// Open the store at `path`, loading any existing document.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = Self::load(&path);
        Self { path, doc }
    }

    fn load(path: &Path) -> StateDocument {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "State file unreadable, starting fresh"
                    );
                    StateDocument::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => StateDocument::default(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "State file unreadable, starting fresh"
                );
                StateDocument::default()
            }
        }
    }

    /// Re-read the document from disk, picking up edits made by other
    /// processes (e.g. a monitor running alongside).
    pub fn reload(&mut self) {
        self.doc = Self::load(&self.path);
    }

    /// Stored state for a single resource.
    pub fn get(&self, arn: &str) -> Option<&UpgradeState> {
        self.doc.upgrades.get(arn)
    }

    /// Merge `patch` into the resource's state (creating it if absent),
    /// stamp `last_updated`, and persist the whole document before returning.
    pub fn update(&mut self, arn: &str, patch: StatePatch) -> Result<(), RupError> {
        let entry = self.doc.upgrades.entry(arn.to_string()).or_default();

        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(version) = patch.current_version {
            entry.current_version = Some(version);
        }
        if let Some(version) = patch.target_version {
            entry.target_version = Some(version);
        }
        if let Some(path) = patch.upgrade_path {
            entry.upgrade_path = path;
        }
        if let Some(idx) = patch.step_idx {
            entry.step_idx = idx;
        }
        if let Some(message) = patch.error {
            entry.error = Some(message);
        }
        entry.last_updated = Some(Utc::now());

        self.persist()
    }

    /// True if any tracked resource is pending or in progress.
    pub fn has_resumable(&self) -> bool {
        self.doc.upgrades.values().any(|s| s.status.is_resumable())
    }

    /// Write the document to `<path>.tmp`, fsync, rename over the target,
    /// then fsync the parent directory so the rename itself is durable.
    fn persist(&self) -> Result<(), RupError> {
        let persistence = |e: io::Error| RupError::Persistence(e.to_string());

        let json = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| RupError::Persistence(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp).map_err(persistence)?;
        file.write_all(json.as_bytes()).map_err(persistence)?;
        file.sync_all().map_err(persistence)?;
        fs::rename(&tmp, &self.path).map_err(persistence)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dir = OpenOptions::new().read(true).open(dir).map_err(persistence)?;
        dir.sync_all().map_err(persistence)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> StateStore {
        StateStore::open(dir.path().join("upgrade-state.json"))
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get("arn:x").is_none());
        assert!(!store.has_resumable());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");
        fs::write(&path, "{not json").unwrap();

        let store = StateStore::open(&path);
        assert!(store.get("arn:x").is_none());
        assert!(!store.has_resumable());
    }

    #[test]
    fn test_update_creates_entry_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");

        let mut store = StateStore::open(&path);
        store
            .update(
                "arn:x",
                StatePatch::status(UpgradeStatus::Pending)
                    .current_version("10.4")
                    .upgrade_path(vec!["10.11".to_string(), "10.18".to_string()])
                    .step_idx(0),
            )
            .unwrap();

        // A second store opened on the same path sees the persisted state.
        let reopened = StateStore::open(&path);
        let state = reopened.get("arn:x").unwrap();
        assert_eq!(state.status, UpgradeStatus::Pending);
        assert_eq!(state.current_version.as_deref(), Some("10.4"));
        assert_eq!(state.upgrade_path, vec!["10.11", "10.18"]);
        assert_eq!(state.step_idx, 0);
        assert!(state.last_updated.is_some());
    }

    #[test]
    fn test_update_merges_without_clobbering() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        store
            .update(
                "arn:x",
                StatePatch::status(UpgradeStatus::Pending)
                    .upgrade_path(vec!["10.11".to_string()]),
            )
            .unwrap();
        store
            .update("arn:x", StatePatch::default().current_version("10.4"))
            .unwrap();

        let state = store.get("arn:x").unwrap();
        assert_eq!(state.status, UpgradeStatus::Pending);
        assert_eq!(state.upgrade_path, vec!["10.11"]);
        assert_eq!(state.current_version.as_deref(), Some("10.4"));
    }

    #[test]
    fn test_repeated_identical_updates_are_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");
        let mut store = StateStore::open(&path);

        let patch = || {
            StatePatch::status(UpgradeStatus::InProgress)
                .current_version("10.11")
                .step_idx(1)
        };

        store.update("arn:x", patch()).unwrap();
        let mut first = store.get("arn:x").unwrap().clone();

        for _ in 0..3 {
            store.update("arn:x", patch()).unwrap();
        }
        let mut last = StateStore::open(&path).get("arn:x").unwrap().clone();

        // Everything except the mutation timestamp must be unchanged.
        first.last_updated = None;
        last.last_updated = None;
        assert_eq!(first, last);
    }

    #[test]
    fn test_reload_picks_up_external_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");
        let mut store = StateStore::open(&path);
        assert!(!store.has_resumable());

        fs::write(
            &path,
            r#"{"upgrades": {"arn:x": {"status": "in_progress", "upgrade_path": ["10.18"], "step_idx": 0}}}"#,
        )
        .unwrap();

        store.reload();
        assert!(store.has_resumable());
        assert_eq!(
            store.get("arn:x").unwrap().status,
            UpgradeStatus::InProgress
        );
    }

    #[test]
    fn test_resumable_reflects_exactly_pending_and_in_progress() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        for (arn, status) in [
            ("arn:a", UpgradeStatus::Completed),
            ("arn:b", UpgradeStatus::Failed),
            ("arn:c", UpgradeStatus::Skipped),
            ("arn:d", UpgradeStatus::NotStarted),
        ] {
            store.update(arn, StatePatch::status(status)).unwrap();
        }
        assert!(!store.has_resumable());

        store
            .update("arn:e", StatePatch::status(UpgradeStatus::Pending))
            .unwrap();
        assert!(store.has_resumable());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");
        fs::write(
            &path,
            r#"{"upgrades": {"arn:x": {"status": "completed", "operator_note": "manual", "retries": 3}}, "schema": 2}"#,
        )
        .unwrap();

        let store = StateStore::open(&path);
        assert_eq!(store.get("arn:x").unwrap().status, UpgradeStatus::Completed);
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("upgrade-state.json");
        let mut store = StateStore::open(&path);
        store
            .update("arn:x", StatePatch::status(UpgradeStatus::Skipped))
            .unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("upgrade-state.json.tmp").exists());
    }

    #[test]
    fn test_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&UpgradeStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: UpgradeStatus = serde_json::from_str(r#""not_started""#).unwrap();
        assert_eq!(back, UpgradeStatus::NotStarted);
    }

    #[test]
    fn test_status_predicates() {
        assert!(UpgradeStatus::Completed.is_terminal());
        assert!(UpgradeStatus::Failed.is_terminal());
        assert!(UpgradeStatus::Skipped.is_terminal());
        assert!(!UpgradeStatus::Pending.is_terminal());

        assert!(UpgradeStatus::Pending.is_resumable());
        assert!(UpgradeStatus::InProgress.is_resumable());
        assert!(!UpgradeStatus::NotStarted.is_resumable());
        assert!(!UpgradeStatus::Completed.is_resumable());
    }
}
