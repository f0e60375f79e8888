//! Semantic versioning of backups: per-branch version ledgers, tags, branch
//! summaries and the rollback history.
//!
//! Everything lives in JSON files under `.metadata/.versions/`. The directory
//! is created on first write, so a plain backup run never leaves versioning
//! residue behind. Files are validated on read and reinitialized (with a
//! warning) on corruption.

pub mod semver;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

pub use semver::{BackupVersion, IncrementLevel};

use crate::store::{read_json_or_default, write_json_atomic, ArtifactStore};
use crate::{OrchestratorError, Result};

pub const VERSIONS_DIR: &str = ".versions";
const STATE_FILE: &str = "version_state.json";
const TAGS_FILE: &str = "tags.json";
const BRANCHES_FILE: &str = "branches.json";
const ROLLBACK_FILE: &str = "rollback_history.json";

/// Current `(MAJOR, MINOR, PATCH)` position of a branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BranchCursor {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// One assigned version in the append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub artifact: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionState {
    #[serde(default)]
    pub branches: BTreeMap<String, BranchCursor>,
    #[serde(default)]
    pub entries: Vec<VersionEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Branch summary kept in `branches.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub backup_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Appended whenever a rollback runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub timestamp: DateTime<Utc>,
    pub target_version: String,
    pub safety_backup: String,
}

/// Outcome of comparing two versions.
#[derive(Debug)]
pub struct VersionComparison {
    pub first: BackupVersion,
    pub second: BackupVersion,
    pub first_is_newer: bool,
    pub same_branch: bool,
    pub compatible: bool,
}

pub struct VersionManager {
    dir: PathBuf,
}

impl VersionManager {
    pub fn open(store: &ArtifactStore) -> Self {
        Self {
            dir: store.metadata_dir().join(VERSIONS_DIR),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn load_state(&self) -> VersionState {
        read_json_or_default(&self.path(STATE_FILE))
    }

    fn save_state(&self, state: &VersionState) -> Result<()> {
        write_json_atomic(&self.path(STATE_FILE), state)
    }

    pub fn load_tags(&self) -> BTreeMap<String, Vec<String>> {
        read_json_or_default(&self.path(TAGS_FILE))
    }

    fn save_tags(&self, tags: &BTreeMap<String, Vec<String>>) -> Result<()> {
        write_json_atomic(&self.path(TAGS_FILE), tags)
    }

    pub fn load_branches(&self) -> BTreeMap<String, BranchInfo> {
        read_json_or_default(&self.path(BRANCHES_FILE))
    }

    fn save_branches(&self, branches: &BTreeMap<String, BranchInfo>) -> Result<()> {
        write_json_atomic(&self.path(BRANCHES_FILE), branches)
    }

    pub fn rollback_history(&self) -> Vec<RollbackEntry> {
        read_json_or_default(&self.path(ROLLBACK_FILE))
    }

    /// Most recently assigned version on a branch.
    pub fn latest_on_branch(&self, branch: &str) -> Option<VersionEntry> {
        self.load_state()
            .entries
            .iter()
            .filter(|e| e.branch == branch)
            .max_by_key(|e| e.created_at)
            .cloned()
    }

    /// Computes the next version on a branch: a fresh branch starts at 1.0.0,
    /// an existing one advances by the requested increment. Nothing is
    /// persisted until [`record_version`](Self::record_version) runs.
    pub fn next_version(
        &self,
        branch: &str,
        level: IncrementLevel,
        now: DateTime<Utc>,
    ) -> BackupVersion {
        let build = now.format("%Y%m%d_%H%M%S").to_string();
        match self.load_state().branches.get(branch) {
            Some(cursor) => {
                BackupVersion::from_parts(cursor.major, cursor.minor, cursor.patch, branch, &build)
                    .bump(level, &build)
            }
            None => BackupVersion::initial(branch, &build),
        }
    }

    /// Persists an assigned version: advances the branch cursor, appends the
    /// ledger entry, updates the branch summary and tag index.
    pub fn record_version(
        &self,
        artifact: &str,
        version: &BackupVersion,
        tags: &[String],
        description: Option<&str>,
        parent: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.load_state();
        state.branches.insert(
            version.branch.clone(),
            BranchCursor {
                major: version.major,
                minor: version.minor,
                patch: version.patch,
            },
        );
        state.entries.push(VersionEntry {
            version: version.to_string(),
            artifact: artifact.to_string(),
            branch: version.branch.clone(),
            created_at: now,
            tags: tags.to_vec(),
            description: description.map(str::to_string),
            parent,
            extra: Default::default(),
        });
        self.save_state(&state)?;

        let mut branches = self.load_branches();
        let info = branches.entry(version.branch.clone()).or_default();
        info.backup_count += 1;
        info.last_backup = Some(now);
        self.save_branches(&branches)?;

        if !tags.is_empty() {
            let mut tag_index = self.load_tags();
            for tag in tags {
                insert_sorted(tag_index.entry(tag.clone()).or_default(), &version.to_string());
            }
            self.save_tags(&tag_index)?;
        }

        info!("assigned version {version} to backup '{artifact}'");
        Ok(())
    }

    /// Ledger entries, newest first, with optional branch/tag filters.
    pub fn list(
        &self,
        branch: Option<&str>,
        tag: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<VersionEntry> {
        let tag_index = self.load_tags();
        let mut entries: Vec<VersionEntry> = self
            .load_state()
            .entries
            .into_iter()
            .filter(|e| branch.map_or(true, |b| e.branch == b))
            .filter(|e| {
                tag.map_or(true, |t| {
                    e.tags.iter().any(|et| et == t)
                        || tag_index
                            .get(t)
                            .is_some_and(|versions| versions.contains(&e.version))
                })
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    pub fn info(&self, version: &str) -> Option<VersionEntry> {
        self.load_state()
            .entries
            .into_iter()
            .find(|e| e.version == version)
    }

    pub fn compare(&self, first: &str, second: &str) -> Result<VersionComparison> {
        let a: BackupVersion = first.parse()?;
        let b: BackupVersion = second.parse()?;
        Ok(VersionComparison {
            first_is_newer: a.is_newer_than(&b),
            same_branch: a.branch == b.branch,
            compatible: a.is_compatible_with(&b),
            first: a,
            second: b,
        })
    }

    /// Tags an existing version. The tag index keeps a sorted, deduplicated
    /// version list per tag; the ledger entry mirrors the tag so cleanup can
    /// see it without consulting the index.
    pub fn create_tag(&self, version: &str, tag: &str, description: Option<&str>) -> Result<()> {
        let mut state = self.load_state();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.version == version)
            .ok_or_else(|| {
                OrchestratorError::ValidationFailed(format!("version not found: {version}"))
            })?;
        if !entry.tags.iter().any(|t| t == tag) {
            entry.tags.push(tag.to_string());
        }
        if entry.description.is_none() {
            entry.description = description.map(str::to_string);
        }
        self.save_state(&state)?;

        let mut tag_index = self.load_tags();
        insert_sorted(tag_index.entry(tag.to_string()).or_default(), version);
        self.save_tags(&tag_index)?;

        info!("tagged version {version} as '{tag}'");
        Ok(())
    }

    pub fn record_rollback(
        &self,
        target_version: &str,
        safety_backup: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut history = self.rollback_history();
        history.push(RollbackEntry {
            timestamp: now,
            target_version: target_version.to_string(),
            safety_backup: safety_backup.to_string(),
        });
        write_json_atomic(&self.path(ROLLBACK_FILE), &history)
    }

    /// Versions to drop so each branch keeps its newest `keep` entries. The
    /// most recent version of a branch and any tagged version are never
    /// dropped. With `dry_run` the ledger is left untouched; otherwise the
    /// doomed entries are removed and the caller deletes the artifacts.
    pub fn cleanup(&self, keep: usize, dry_run: bool) -> Result<Vec<VersionEntry>> {
        let mut state = self.load_state();
        let tag_index = self.load_tags();
        let tagged = |entry: &VersionEntry| {
            !entry.tags.is_empty()
                || tag_index
                    .values()
                    .any(|versions| versions.contains(&entry.version))
        };

        let mut by_branch: BTreeMap<String, Vec<VersionEntry>> = BTreeMap::new();
        for entry in &state.entries {
            by_branch
                .entry(entry.branch.clone())
                .or_default()
                .push(entry.clone());
        }

        let mut doomed = Vec::new();
        for (_, mut entries) in by_branch {
            entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            for entry in entries.into_iter().skip(keep.max(1)) {
                if tagged(&entry) {
                    continue;
                }
                doomed.push(entry);
            }
        }

        if !dry_run && !doomed.is_empty() {
            let dropped: Vec<&str> = doomed.iter().map(|e| e.version.as_str()).collect();
            state.entries.retain(|e| !dropped.contains(&e.version.as_str()));
            self.save_state(&state)?;
            info!("dropped {} old versions", doomed.len());
        }
        Ok(doomed)
    }
}

fn insert_sorted(versions: &mut Vec<String>, version: &str) {
    if let Err(pos) = versions.binary_search_by(|v| v.as_str().cmp(version)) {
        versions.insert(pos, version.to_string());
    }
}
