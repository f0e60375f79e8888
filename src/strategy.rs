//! Full-versus-incremental decision making and persisted strategy state.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use log::warn;

use crate::common::{BackupKind, HistoryRecord, RequestedKind, StrategyState};
use crate::store::{read_json_or_default, write_json_atomic, ArtifactStore};
use crate::Result;

/// A full backup is forced once the last one is this old.
pub const FULL_INTERVAL_DAYS: i64 = 7;

/// A full backup is forced after this many incrementals.
pub const MAX_INCREMENTALS: u32 = 5;

/// Bounded history length in the persisted state.
pub const HISTORY_LIMIT: usize = 50;

/// The chosen kind and the reason behind it, surfaced to the operator.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub kind: BackupKind,
    pub reason: String,
}

pub struct BackupStrategy {
    state_path: PathBuf,
}

impl BackupStrategy {
    pub fn new(store: &ArtifactStore) -> Self {
        Self {
            state_path: store.state_path(),
        }
    }

    /// Loads the persisted state; corruption reinitializes empty, which makes
    /// the next decision default to a full backup.
    pub fn load_state(&self) -> StrategyState {
        read_json_or_default(&self.state_path)
    }

    pub fn save_state(&self, state: &StrategyState) -> Result<()> {
        write_json_atomic(&self.state_path, state)
    }

    /// Decision table mapping the requested kind onto an actual kind.
    pub fn decide(
        &self,
        state: &StrategyState,
        requested: RequestedKind,
        now: DateTime<Utc>,
    ) -> Recommendation {
        match requested {
            RequestedKind::Full => Recommendation {
                kind: BackupKind::Full,
                reason: "full backup explicitly requested".to_string(),
            },
            RequestedKind::Incremental => {
                if state.last_full_at.is_none() {
                    Recommendation {
                        kind: BackupKind::Full,
                        reason: "incremental requested but no full backup exists yet".to_string(),
                    }
                } else {
                    Recommendation {
                        kind: BackupKind::Incremental,
                        reason: "incremental backup explicitly requested".to_string(),
                    }
                }
            }
            RequestedKind::Auto => {
                let Some(last_full) = state.last_full_at else {
                    return Recommendation {
                        kind: BackupKind::Full,
                        reason: "no previous full backup".to_string(),
                    };
                };
                let age = now - last_full;
                if age >= Duration::days(FULL_INTERVAL_DAYS) {
                    return Recommendation {
                        kind: BackupKind::Full,
                        reason: format!("last full backup is {} days old", age.num_days()),
                    };
                }
                if state.incrementals_since_full >= MAX_INCREMENTALS {
                    return Recommendation {
                        kind: BackupKind::Full,
                        reason: format!(
                            "{} incrementals since the last full backup",
                            state.incrementals_since_full
                        ),
                    };
                }
                Recommendation {
                    kind: BackupKind::Incremental,
                    reason: "recent full backup exists".to_string(),
                }
            }
        }
    }

    /// The `pg_dump` invocation for a backup kind; the handler prepends the
    /// backend exec wrapper.
    pub fn dump_command(user: &str, database: &str, kind: BackupKind) -> Vec<String> {
        let mut argv = vec![
            "pg_dump".to_string(),
            format!("--username={user}"),
            format!("--dbname={database}"),
        ];
        match kind {
            BackupKind::Full => {
                argv.push("--clean".to_string());
                argv.push("--create".to_string());
                argv.push("--verbose".to_string());
            }
            BackupKind::Incremental => {
                argv.push("--verbose".to_string());
                argv.push("--no-owner".to_string());
                argv.push("--no-privileges".to_string());
            }
        }
        argv
    }

    /// Records a completed backup: bumps counters, appends to the bounded
    /// history and persists atomically.
    pub fn record_backup(&self, state: &mut StrategyState, record: HistoryRecord) -> Result<()> {
        match record.kind {
            BackupKind::Full => {
                state.last_full_at = Some(record.created_at);
                state.incrementals_since_full = 0;
            }
            BackupKind::Incremental => {
                state.incrementals_since_full += 1;
            }
        }
        state.history.push(record);
        if state.history.len() > HISTORY_LIMIT {
            let excess = state.history.len() - HISTORY_LIMIT;
            state.history.drain(..excess);
        }
        self.save_state(state)
    }

    /// Loads the state, rebuilding it from sidecars when any sidecar is newer
    /// than the state file. A crash between payload completion and the state
    /// update leaves exactly that situation behind.
    pub fn reconcile(&self, store: &ArtifactStore) -> Result<StrategyState> {
        let state_mtime = std::fs::metadata(&self.state_path)
            .and_then(|m| m.modified())
            .ok();

        let mut newest_sidecar: Option<std::time::SystemTime> = None;
        let artifacts = store.list()?;
        for artifact in &artifacts {
            if artifact.sidecar.is_none() {
                continue;
            }
            if let Ok(mtime) = std::fs::metadata(store.sidecar_path(&artifact.name))
                .and_then(|m| m.modified())
            {
                if newest_sidecar.map_or(true, |n| mtime > n) {
                    newest_sidecar = Some(mtime);
                }
            }
        }

        let stale = match (state_mtime, newest_sidecar) {
            (Some(state), Some(sidecar)) => sidecar > state,
            (None, Some(_)) => true,
            _ => false,
        };
        if !stale {
            return Ok(self.load_state());
        }

        let mut records: Vec<HistoryRecord> = artifacts
            .iter()
            .filter_map(|a| a.sidecar.as_ref())
            .map(|sc| HistoryRecord {
                name: sc.name.clone(),
                kind: sc.kind,
                created_at: sc.created_at,
                size_bytes: sc.size_bytes,
            })
            .collect();
        records.sort_by_key(|r| r.created_at);

        let last_full_at = records
            .iter()
            .filter(|r| r.kind == BackupKind::Full)
            .map(|r| r.created_at)
            .max();
        let incrementals_since_full = records
            .iter()
            .filter(|r| {
                r.kind == BackupKind::Incremental
                    && last_full_at.map_or(true, |full| r.created_at > full)
            })
            .count() as u32;
        if records.len() > HISTORY_LIMIT {
            let excess = records.len() - HISTORY_LIMIT;
            records.drain(..excess);
        }

        warn!(
            "strategy state is stale, rebuilt from {} sidecar records",
            records.len()
        );
        let state = StrategyState {
            last_full_at,
            incrementals_since_full,
            history: records,
            extra: Default::default(),
        };
        self.save_state(&state)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strategy() -> (tempfile::TempDir, ArtifactStore, BackupStrategy) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let strategy = BackupStrategy::new(&store);
        (dir, store, strategy)
    }

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_backup_is_always_full() {
        let (_dir, _store, strategy) = strategy();
        let state = StrategyState::default();
        for requested in [
            RequestedKind::Auto,
            RequestedKind::Full,
            RequestedKind::Incremental,
        ] {
            let rec = strategy.decide(&state, requested, at(2025, 3, 10));
            assert_eq!(rec.kind, BackupKind::Full, "{requested:?}");
        }
    }

    #[test]
    fn auto_stays_incremental_within_thresholds() {
        let (_dir, _store, strategy) = strategy();
        let state = StrategyState {
            last_full_at: Some(at(2025, 3, 8)),
            incrementals_since_full: 2,
            ..Default::default()
        };
        let rec = strategy.decide(&state, RequestedKind::Auto, at(2025, 3, 10));
        assert_eq!(rec.kind, BackupKind::Incremental);
    }

    #[test]
    fn auto_promotes_after_seven_days() {
        let (_dir, _store, strategy) = strategy();
        let state = StrategyState {
            last_full_at: Some(at(2025, 3, 1)),
            incrementals_since_full: 1,
            ..Default::default()
        };
        let rec = strategy.decide(&state, RequestedKind::Auto, at(2025, 3, 10));
        assert_eq!(rec.kind, BackupKind::Full);
        assert!(rec.reason.contains("days old"));
    }

    #[test]
    fn auto_promotes_after_five_incrementals() {
        let (_dir, _store, strategy) = strategy();
        let state = StrategyState {
            last_full_at: Some(at(2025, 3, 9)),
            incrementals_since_full: MAX_INCREMENTALS,
            ..Default::default()
        };
        let rec = strategy.decide(&state, RequestedKind::Auto, at(2025, 3, 10));
        assert_eq!(rec.kind, BackupKind::Full);
    }

    #[test]
    fn record_backup_tracks_counters() {
        let (_dir, _store, strategy) = strategy();
        let mut state = StrategyState::default();
        let base = at(2025, 3, 10);

        strategy
            .record_backup(
                &mut state,
                HistoryRecord {
                    name: "a".to_string(),
                    kind: BackupKind::Full,
                    created_at: base,
                    size_bytes: 100,
                },
            )
            .unwrap();
        assert_eq!(state.incrementals_since_full, 0);
        assert_eq!(state.last_full_at, Some(base));

        for i in 0..3 {
            strategy
                .record_backup(
                    &mut state,
                    HistoryRecord {
                        name: format!("i{i}"),
                        kind: BackupKind::Incremental,
                        created_at: base + Duration::minutes(i + 1),
                        size_bytes: 10,
                    },
                )
                .unwrap();
        }
        assert_eq!(state.incrementals_since_full, 3);

        let reloaded = strategy.load_state();
        assert_eq!(reloaded.incrementals_since_full, 3);
        assert_eq!(reloaded.history.len(), 4);
    }

    #[test]
    fn history_is_bounded() {
        let (_dir, _store, strategy) = strategy();
        let mut state = StrategyState::default();
        let base = at(2025, 3, 1);
        for i in 0..(HISTORY_LIMIT + 10) {
            strategy
                .record_backup(
                    &mut state,
                    HistoryRecord {
                        name: format!("b{i}"),
                        kind: BackupKind::Incremental,
                        created_at: base + Duration::minutes(i as i64),
                        size_bytes: 1,
                    },
                )
                .unwrap();
        }
        assert_eq!(state.history.len(), HISTORY_LIMIT);
        assert_eq!(state.history.last().unwrap().name, "b59");
    }

    #[test]
    fn corrupted_state_reinitializes() {
        let (_dir, store, strategy) = strategy();
        std::fs::write(store.state_path(), "{ not json").unwrap();
        let state = strategy.load_state();
        assert!(state.last_full_at.is_none());
        let rec = strategy.decide(&state, RequestedKind::Auto, at(2025, 3, 10));
        assert_eq!(rec.kind, BackupKind::Full);
    }

    #[test]
    fn dump_command_matches_kind() {
        let full = BackupStrategy::dump_command("postgres", "pc_db", BackupKind::Full);
        assert_eq!(
            full,
            vec![
                "pg_dump",
                "--username=postgres",
                "--dbname=pc_db",
                "--clean",
                "--create",
                "--verbose"
            ]
        );
        let inc = BackupStrategy::dump_command("postgres", "pc_db", BackupKind::Incremental);
        assert!(inc.contains(&"--no-owner".to_string()));
        assert!(inc.contains(&"--no-privileges".to_string()));
        assert!(!inc.contains(&"--clean".to_string()));
    }
}
