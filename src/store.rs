//! On-disk artifact store: payload files, sidecar metadata, state files.
//!
//! Layout under the backup directory:
//!
//! ```text
//! <backup_dir>/
//!   <name>.sql
//!   .metadata/
//!     backup_state.json
//!     <name>.json
//!     .versions/            (present only once versioning is used)
//! ```
//!
//! Every state and ledger write goes through a tmp-file-plus-rename so a crash
//! never leaves a half-written JSON document behind.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::{ArtifactInfo, SidecarRecord};
use crate::{OrchestratorError, Result};

pub const METADATA_DIR: &str = ".metadata";
pub const STATE_FILE: &str = "backup_state.json";
const LOCK_FILE: &str = ".lock";

const MAX_NAME_LEN: usize = 255;
const VALIDATION_WINDOW: u64 = 64 * 1024;
const DUMP_HEADER: &str = "PostgreSQL database dump";
const DDL_KEYWORDS: [&str; 5] = ["CREATE", "ALTER", "SET", "COPY", "INSERT"];
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub struct ArtifactStore {
    backup_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(backup_dir: &Path) -> Result<Self> {
        let metadata_dir = backup_dir.join(METADATA_DIR);
        fs::create_dir_all(&metadata_dir)?;
        Ok(Self {
            backup_dir: backup_dir.to_path_buf(),
            metadata_dir,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.metadata_dir.join(STATE_FILE)
    }

    pub fn payload_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{name}.sql"))
    }

    pub fn sidecar_path(&self, name: &str) -> PathBuf {
        self.metadata_dir.join(format!("{name}.json"))
    }

    /// Accepts `[A-Za-z0-9._-]{1,255}` names that do not start with a dot and
    /// are not reserved platform names.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(OrchestratorError::NameInvalid(
                "name must not be empty".to_string(),
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(OrchestratorError::NameInvalid(format!(
                "name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if name.starts_with('.') {
            return Err(OrchestratorError::NameInvalid(
                "name must not start with '.'".to_string(),
            ));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(OrchestratorError::NameInvalid(format!(
                "character '{bad}' is not allowed (use letters, digits, '.', '_' or '-')"
            )));
        }
        if RESERVED_NAMES.contains(&name.to_ascii_uppercase().as_str()) {
            return Err(OrchestratorError::NameReserved(name.to_string()));
        }
        Ok(())
    }

    /// Validates a candidate name and resolves collisions. Without `overwrite`
    /// an occupied name gets `_1`, `_2`, ... appended; the boolean reports
    /// whether a rename happened.
    pub fn resolve_name(&self, name: &str, overwrite: bool) -> Result<(String, bool)> {
        Self::validate_name(name)?;
        if overwrite || !self.payload_path(name).exists() {
            return Ok((name.to_string(), false));
        }
        for i in 1..=9999u32 {
            let candidate = format!("{name}_{i}");
            if candidate.len() > MAX_NAME_LEN {
                break;
            }
            if !self.payload_path(&candidate).exists() {
                return Ok((candidate, true));
            }
        }
        Err(OrchestratorError::NameCollision(name.to_string()))
    }

    /// All payloads, newest modification first, with sidecars attached when
    /// present. Sidecar-less payloads are listed as legacy entries.
    pub fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let metadata = entry.metadata()?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let sidecar = self.read_sidecar(&name)?;
            artifacts.push(ArtifactInfo {
                name,
                path,
                size_bytes: metadata.len(),
                modified,
                sidecar,
            });
        }
        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(artifacts)
    }

    /// Reads a sidecar if one exists. An unparseable sidecar is treated like a
    /// missing one so a damaged record never blocks listing or restore.
    pub fn read_sidecar(&self, name: &str) -> Result<Option<SidecarRecord>> {
        let path = self.sidecar_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("sidecar for '{name}' is unreadable ({err}), treating as legacy");
                Ok(None)
            }
        }
    }

    pub fn write_sidecar(&self, record: &SidecarRecord) -> Result<()> {
        write_json_atomic(&self.sidecar_path(&record.name), record)
    }

    /// Removes a payload and its sidecar.
    pub fn delete(&self, name: &str) -> Result<()> {
        let payload = self.payload_path(name);
        if payload.exists() {
            fs::remove_file(&payload)?;
            info!("deleted backup '{name}'");
        }
        let sidecar = self.sidecar_path(name);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
        Ok(())
    }

    /// Cheap structural validation of a dump payload: non-empty, readable, and
    /// with recognizable dump markers in the first 64 KB. The SQL itself is
    /// never parsed.
    pub fn validate_payload(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(OrchestratorError::ValidationFailed(format!(
                "'{}' does not exist",
                path.display()
            )));
        }
        let metadata = fs::metadata(path)?;
        if metadata.len() == 0 {
            return Err(OrchestratorError::ValidationFailed(format!(
                "'{}' is empty",
                path.display()
            )));
        }

        let mut head = String::new();
        File::open(path)?
            .take(VALIDATION_WINDOW)
            .read_to_string(&mut head)
            .map_err(|_| {
                OrchestratorError::ValidationFailed(format!(
                    "'{}' is not valid UTF-8 text",
                    path.display()
                ))
            })?;

        if head.contains(DUMP_HEADER) {
            return Ok(());
        }
        let has_ddl = head.lines().any(|line| {
            let line = line.trim_start();
            DDL_KEYWORDS.iter().any(|kw| line.starts_with(kw))
        });
        if has_ddl {
            return Ok(());
        }
        Err(OrchestratorError::ValidationFailed(format!(
            "'{}' carries no recognizable PostgreSQL dump markers",
            path.display()
        )))
    }

    /// Exclusive advisory lock guarding state, sidecar and ledger mutation.
    /// Payload streaming itself does not take the lock; distinct filenames
    /// make concurrent payload writes safe.
    pub fn lock(&self) -> Result<StoreLock> {
        let path = self.metadata_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        if !file.try_lock_exclusive()? {
            return Err(OrchestratorError::LockBusy);
        }
        Ok(StoreLock { file })
    }
}

/// Held for the duration of a state mutation; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("failed to release backup directory lock: {err}");
        }
    }
}

/// Serializes to `<path>.tmp`, fsyncs, then renames over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name: OsString = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let data = serde_json::to_vec_pretty(value)?;
    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Loads a JSON document, falling back to the default on absence or
/// corruption. Corruption is warned about, never fatal.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match fs::read_to_string(path).map_err(OrchestratorError::Io).and_then(|raw| {
        serde_json::from_str(&raw).map_err(OrchestratorError::Json)
    }) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "'{}' is corrupted ({err}), reinitializing empty",
                path.display()
            );
            T::default()
        }
    }
}
