use std::path::PathBuf;

use crate::{OrchestratorError, Result};

pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "12345";
pub const DEFAULT_DATABASE: &str = "pc_db";
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Credentials and database name passed to `pg_dump`/`psql` inside the target.
/// The password travels only through the child's `PGPASSWORD` environment and
/// is masked whenever a command line is logged.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DbConfig {
    /// Resolves the database configuration from the conventional environment
    /// variables, falling back to the demo-setup defaults.
    pub fn from_env() -> Self {
        Self {
            user: env_or("POSTGRES_USER", DEFAULT_USER),
            password: env_or("POSTGRES_PASSWORD", DEFAULT_PASSWORD),
            database: env_or("POSTGRES_DB", DEFAULT_DATABASE),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Backup directory: explicit flag wins, then `BACKUP_DIR`, then the default.
pub fn resolve_backup_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    std::env::var("BACKUP_DIR")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR))
}

/// Parses a `k=v[,k=v]` label selector into pairs.
pub fn parse_labels(raw: &str) -> Result<Vec<(String, String)>> {
    let mut labels = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            OrchestratorError::Config(format!("label '{part}' is not of the form key=value"))
        })?;
        if key.is_empty() {
            return Err(OrchestratorError::Config(format!(
                "label '{part}' has an empty key"
            )));
        }
        labels.push((key.to_string(), value.to_string()));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_selectors() {
        let labels = parse_labels("app=postgres,tier=db").unwrap();
        assert_eq!(
            labels,
            vec![
                ("app".to_string(), "postgres".to_string()),
                ("tier".to_string(), "db".to_string())
            ]
        );
    }

    #[test]
    fn rejects_malformed_labels() {
        assert!(parse_labels("app").is_err());
        assert!(parse_labels("=postgres").is_err());
    }

    #[test]
    fn backup_dir_prefers_flag() {
        let dir = resolve_backup_dir(Some(PathBuf::from("/tmp/backups")));
        assert_eq!(dir, PathBuf::from("/tmp/backups"));
    }
}
