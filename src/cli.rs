//! Command-line surface.
//!
//! One flat executable: a plain invocation takes a backup, and mode flags
//! (`--list`, `--restore`, `--apply-retention`, the versioning queries)
//! switch to the other operations.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::common::RequestedKind;
use crate::environment::Environment;
use crate::orchestrator::VersioningRequest;
use crate::versioning::IncrementLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackupTypeArg {
    Auto,
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IncrementArg {
    Major,
    Minor,
    Patch,
}

#[derive(Parser, Debug)]
#[clap(
    name = "pgkeeper",
    about = "PostgreSQL backup and restore orchestrator for Docker containers and Kubernetes pods"
)]
pub struct Cli {
    // Target selection
    /// Docker container name (skips discovery)
    #[clap(long)]
    pub container: Option<String>,

    /// Kubernetes pod name (skips discovery)
    #[clap(long)]
    pub pod: Option<String>,

    /// Kubernetes namespace
    #[clap(long, default_value = "default")]
    pub namespace: String,

    /// Pod label selector, e.g. app=postgres,tier=db
    #[clap(long)]
    pub labels: Option<String>,

    /// Container inside a multi-container pod
    #[clap(long = "k8s-container")]
    pub k8s_container: Option<String>,

    /// Force the Docker backend
    #[clap(long, conflicts_with = "force_kubernetes")]
    pub force_docker: bool,

    /// Force the Kubernetes backend
    #[clap(long)]
    pub force_kubernetes: bool,

    /// Auto-detect the backend (the default)
    #[clap(long)]
    pub auto_detect: bool,

    // Backup mode
    /// Custom backup name (without the .sql extension)
    #[clap(long)]
    pub name: Option<String>,

    /// Backup directory (default: $BACKUP_DIR or ./backups)
    #[clap(long)]
    pub dir: Option<PathBuf>,

    /// Overwrite an existing backup of the same name
    #[clap(long)]
    pub force: bool,

    /// Backup kind selection
    #[clap(long, value_enum, default_value = "auto")]
    pub backup_type: BackupTypeArg,

    /// Force a full backup regardless of --backup-type
    #[clap(long)]
    pub force_full: bool,

    /// Suppress progress output
    #[clap(long)]
    pub quiet: bool,

    /// Enable debug output
    #[clap(long)]
    pub verbose: bool,

    /// Disable colored log output
    #[clap(long)]
    pub no_color: bool,

    // Listing
    /// List existing backups and exit
    #[clap(long)]
    pub list: bool,

    /// Show retention counts, totals and the next recommendation
    #[clap(long)]
    pub backup_summary: bool,

    // Restore
    /// Restore a backup (interactive selection unless --restore-file is set)
    #[clap(long)]
    pub restore: bool,

    /// Restore this specific backup file
    #[clap(long)]
    pub restore_file: Option<PathBuf>,

    /// Skip the restore confirmation prompt
    #[clap(long)]
    pub yes: bool,

    // Retention
    /// Daily backups to keep
    #[clap(long)]
    pub retention_daily: Option<usize>,

    /// Weekly backups to keep
    #[clap(long)]
    pub retention_weekly: Option<usize>,

    /// Monthly backups to keep
    #[clap(long)]
    pub retention_monthly: Option<usize>,

    /// Full backups to keep
    #[clap(long)]
    pub retention_full: Option<usize>,

    /// Show the retention deletion plan without deleting
    #[clap(long)]
    pub retention_dry_run: bool,

    /// Apply the retention policy and delete old backups
    #[clap(long)]
    pub apply_retention: bool,

    // Versioning
    /// Record a semantic version for this backup
    #[clap(long)]
    pub enable_versioning: bool,

    /// Version branch
    #[clap(long, default_value = "main")]
    pub branch: String,

    /// Explicit version string (MAJOR.MINOR.PATCH-BRANCH.BUILD)
    #[clap(long)]
    pub version: Option<String>,

    /// Component to increment when assigning the next version
    #[clap(long, value_enum, default_value = "patch")]
    pub version_increment: IncrementArg,

    /// Tags to attach to the version
    #[clap(long, num_args = 1..)]
    pub tags: Vec<String>,

    /// Free-form description for the version or tag
    #[clap(long)]
    pub description: Option<String>,

    /// List recorded versions and exit
    #[clap(long)]
    pub list_versions: bool,

    /// Restrict --list-versions to one branch
    #[clap(long)]
    pub filter_branch: Option<String>,

    /// Restrict --list-versions to one tag
    #[clap(long)]
    pub filter_tag: Option<String>,

    /// Maximum number of versions to list
    #[clap(long)]
    pub limit: Option<usize>,

    /// Show details for one version and exit
    #[clap(long, value_name = "VERSION")]
    pub version_info: Option<String>,

    /// Compare two versions and exit
    #[clap(long, num_args = 2, value_names = ["V1", "V2"])]
    pub compare_versions: Option<Vec<String>>,

    /// List branches and exit
    #[clap(long)]
    pub list_branches: bool,

    /// Tag a version: --create-tag VERSION NAME
    #[clap(long, num_args = 2, value_names = ["VERSION", "NAME"])]
    pub create_tag: Option<Vec<String>>,

    /// List tags and exit
    #[clap(long)]
    pub list_tags: bool,

    /// Roll back to a recorded version (takes a safety backup first)
    #[clap(long, value_name = "VERSION")]
    pub rollback_to: Option<String>,

    /// Show the rollback ledger and exit
    #[clap(long)]
    pub rollback_history: bool,

    /// Keep only the newest N versions per branch
    #[clap(long, value_name = "N")]
    pub cleanup_versions: Option<usize>,

    /// Show the version cleanup plan without deleting
    #[clap(long)]
    pub cleanup_dry_run: bool,
}

impl Cli {
    pub fn forced_environment(&self) -> Option<Environment> {
        if self.force_docker {
            Some(Environment::Docker)
        } else if self.force_kubernetes {
            Some(Environment::Kubernetes)
        } else {
            None
        }
    }

    pub fn requested_kind(&self) -> RequestedKind {
        if self.force_full {
            return RequestedKind::Full;
        }
        match self.backup_type {
            BackupTypeArg::Auto => RequestedKind::Auto,
            BackupTypeArg::Full => RequestedKind::Full,
            BackupTypeArg::Incremental => RequestedKind::Incremental,
        }
    }

    pub fn versioning_request(&self) -> VersioningRequest {
        if !self.enable_versioning {
            return VersioningRequest::disabled();
        }
        VersioningRequest {
            enabled: true,
            branch: self.branch.clone(),
            explicit: self.version.clone(),
            increment: match self.version_increment {
                IncrementArg::Major => IncrementLevel::Major,
                IncrementArg::Minor => IncrementLevel::Minor,
                IncrementArg::Patch => IncrementLevel::Patch,
            },
            tags: self.tags.clone(),
            description: self.description.clone(),
        }
    }
}
