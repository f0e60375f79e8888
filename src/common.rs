use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Backup kind. Both kinds are logical `pg_dump` output; an incremental is a
/// lighter dump (no owner or privilege statements), not a WAL-based delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// What the caller asked for; the strategy engine maps this to a [`BackupKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedKind {
    #[default]
    Auto,
    Full,
    Incremental,
}

/// Retention class assigned from the UTC calendar date at creation time.
/// Artifacts of kind `full` additionally compete in the `full` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionBucket {
    Daily,
    Weekly,
    Monthly,
    Full,
}

impl fmt::Display for RetentionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionBucket::Daily => write!(f, "daily"),
            RetentionBucket::Weekly => write!(f, "weekly"),
            RetentionBucket::Monthly => write!(f, "monthly"),
            RetentionBucket::Full => write!(f, "full"),
        }
    }
}

/// Per-artifact metadata, persisted next to the payload under `.metadata/`.
/// Unknown keys survive a read-modify-write cycle via the `extra` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub name: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub target: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub duration_secs: f64,
    pub retention_bucket: RetentionBucket,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A payload file on disk, paired with its sidecar when one exists.
/// Sidecar-less payloads are legacy: listable and restorable, but invisible
/// to the strategy engine and retention pruning.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub sidecar: Option<SidecarRecord>,
}

/// One entry in the bounded strategy history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub name: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Persisted strategy state (`.metadata/backup_state.json`). Invariant:
/// `incrementals_since_full` equals the number of incremental history records
/// newer than `last_full_at`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyState {
    #[serde(default)]
    pub last_full_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incrementals_since_full: u32,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Current UTC time truncated to second precision, the resolution recorded
/// in sidecars and build stamps.
pub fn utc_now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Formats a byte count in human-readable units.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn sidecar_preserves_unknown_keys() {
        let raw = r#"{
            "name": "nightly",
            "kind": "full",
            "created_at": "2025-03-01T02:00:00Z",
            "target": "pc_db",
            "size_bytes": 4096,
            "retention_bucket": "monthly",
            "custom_field": {"nested": true}
        }"#;
        let record: SidecarRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.name, "nightly");
        assert!(record.extra.contains_key("custom_field"));

        let rendered = serde_json::to_string(&record).unwrap();
        let reparsed: SidecarRecord = serde_json::from_str(&rendered).unwrap();
        assert!(reparsed.extra.contains_key("custom_field"));
    }
}
