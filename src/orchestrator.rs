//! End-to-end orchestration of backup, restore, retention and versioning.
//!
//! One invocation owns exactly one backup or restore. The write order during
//! a backup is fixed: payload fsync, then sidecar, then strategy state, then
//! version ledgers. A crash at any point leaves a prefix the next invocation
//! recovers from deterministically (a payload without a sidecar is listed as
//! legacy; a sidecar newer than the state file triggers reconciliation).

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::common::{
    format_file_size, utc_now_secs, BackupKind, HistoryRecord, RequestedKind, RetentionBucket,
    SidecarRecord,
};
use crate::config::DbConfig;
use crate::environment::{Environment, EnvironmentDetector};
use crate::handlers::{
    summarize_stderr, DockerHandler, KubernetesHandler, TargetHandler, TargetStatus,
};
use crate::restore::{
    confirm_restore, restore_command, select_artifact, verify_command, RESTORE_TIMEOUT,
    VERIFY_TIMEOUT,
};
use crate::retention::{classify, RetentionEngine, RetentionPolicy};
use crate::runner::{CommandRunner, StdinSource, StdoutSink};
use crate::store::ArtifactStore;
use crate::strategy::BackupStrategy;
use crate::versioning::{BackupVersion, IncrementLevel, VersionManager};
use crate::{OrchestratorError, Result};

const DUMP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Target selection options, straight from the CLI.
#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    pub container: Option<String>,
    pub pod: Option<String>,
    pub namespace: String,
    pub labels: Vec<(String, String)>,
    pub k8s_container: Option<String>,
    pub forced: Option<Environment>,
}

/// One backup request.
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub name: Option<String>,
    pub overwrite: bool,
    pub requested: RequestedKind,
}

/// Versioning parameters attached to a backup.
#[derive(Debug, Clone)]
pub struct VersioningRequest {
    pub enabled: bool,
    pub branch: String,
    pub explicit: Option<String>,
    pub increment: IncrementLevel,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

impl VersioningRequest {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            branch: "main".to_string(),
            explicit: None,
            increment: IncrementLevel::Patch,
            tags: Vec::new(),
            description: None,
        }
    }
}

pub struct Orchestrator {
    db: DbConfig,
    store: ArtifactStore,
    strategy: BackupStrategy,
    retention: RetentionEngine,
    versions: VersionManager,
    runner: CommandRunner,
    target: TargetOptions,
    quiet: bool,
    assume_yes: bool,
}

impl Orchestrator {
    pub fn new(
        db: DbConfig,
        backup_dir: &Path,
        target: TargetOptions,
        policy: RetentionPolicy,
        quiet: bool,
        assume_yes: bool,
        runner: CommandRunner,
    ) -> Result<Self> {
        let store = ArtifactStore::open(backup_dir)?;
        let strategy = BackupStrategy::new(&store);
        let versions = VersionManager::open(&store);
        Ok(Self {
            db,
            store,
            strategy,
            retention: RetentionEngine::new(policy),
            versions,
            runner,
            target,
            quiet,
            assume_yes,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Picks the backend and builds the matching handler. Detection failure
    /// is fatal here: every operation that reaches this point needs a target.
    async fn resolve_handler(&self) -> Result<TargetHandler> {
        let detector = EnvironmentDetector::new(self.runner.clone());
        match detector.detect(self.target.forced).await {
            Environment::Docker => Ok(TargetHandler::Docker(DockerHandler::new(
                self.runner.clone(),
                self.target.container.clone(),
            ))),
            Environment::Kubernetes => Ok(TargetHandler::Kubernetes(KubernetesHandler::new(
                self.runner.clone(),
                self.target.namespace.clone(),
                self.target.labels.clone(),
                self.target.pod.clone(),
                self.target.k8s_container.clone(),
            ))),
            Environment::Unknown => Err(OrchestratorError::TargetNotFound(
                "could not detect a container backend; pass --force-docker or --force-kubernetes"
                    .to_string(),
            )),
        }
    }

    async fn resolve_running_target(
        &self,
        handler: &TargetHandler,
    ) -> Result<(crate::handlers::TargetId, String)> {
        let target = handler.discover().await?;
        let identity = handler.identity(&target);
        match handler.status(&target).await? {
            TargetStatus::Running => Ok((target, identity)),
            TargetStatus::NotRunning => Err(OrchestratorError::TargetNotRunning(identity)),
            TargetStatus::NotFound => Err(OrchestratorError::TargetNotFound(identity)),
        }
    }

    fn pg_env(&self) -> Vec<(String, String)> {
        vec![("PGPASSWORD".to_string(), self.db.password.clone())]
    }

    /// Runs one backup end to end and returns the final artifact name.
    pub async fn backup(
        &self,
        request: &BackupRequest,
        versioning: &VersioningRequest,
    ) -> Result<String> {
        let now = utc_now_secs();
        let mut state = self.strategy.reconcile(&self.store)?;
        let rec = self.strategy.decide(&state, request.requested, now);
        info!("backup kind: {} ({})", rec.kind, rec.reason);

        let (name, renamed) = match &request.name {
            Some(name) => self.store.resolve_name(name, request.overwrite)?,
            None => {
                let generated = format!("backup_{}_{}", now.format("%Y%m%d_%H%M%S"), rec.kind);
                self.store.resolve_name(&generated, request.overwrite)?
            }
        };
        if renamed {
            warn!("backup renamed to '{name}' to avoid a collision");
        }

        let handler = self.resolve_handler().await?;
        let (target, identity) = self.resolve_running_target(&handler).await?;

        let payload_path = self.store.payload_path(&name);
        let tmp_path = tmp_path_for(&payload_path);
        let sink = std::fs::File::create(&tmp_path)?;
        let child_sink = sink.try_clone()?;

        let argv = BackupStrategy::dump_command(&self.db.user, &self.db.database, rec.kind);
        info!(
            "running pg_dump against {} target '{identity}'",
            handler.backend_name()
        );

        let out = match handler
            .exec(
                &target,
                &argv,
                &self.pg_env(),
                StdinSource::Null,
                StdoutSink::File(child_sink),
                DUMP_TIMEOUT,
            )
            .await
        {
            Ok(out) if out.success() => out,
            Ok(out) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(OrchestratorError::ExecNonZero {
                    exit: out.exit_code,
                    stderr: summarize_stderr(&out.stderr),
                });
            }
            Err(err) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(err);
            }
        };

        // Payload must be durable before any metadata references it.
        sink.sync_all()?;
        drop(sink);
        std::fs::rename(&tmp_path, &payload_path)?;
        let size_bytes = std::fs::metadata(&payload_path)?.len();

        let _lock = self.store.lock()?;

        // The version is computed up front so the sidecar carries it, but the
        // ledger itself is persisted only after the strategy state.
        let assigned = if versioning.enabled {
            let version = match &versioning.explicit {
                Some(raw) => raw.parse::<BackupVersion>()?,
                None => {
                    self.versions
                        .next_version(&versioning.branch, versioning.increment, now)
                }
            };
            let parent = self
                .versions
                .latest_on_branch(&version.branch)
                .map(|e| e.version);
            Some((version, parent))
        } else {
            None
        };

        let record = SidecarRecord {
            name: name.clone(),
            kind: rec.kind,
            created_at: now,
            target: identity.clone(),
            size_bytes,
            duration_secs: out.elapsed.as_secs_f64(),
            retention_bucket: classify(now),
            tags: if versioning.enabled {
                versioning.tags.clone()
            } else {
                Vec::new()
            },
            version: assigned.as_ref().map(|(v, _)| v.to_string()),
            branch: assigned.as_ref().map(|(v, _)| v.branch.clone()),
            description: if versioning.enabled {
                versioning.description.clone()
            } else {
                None
            },
            parent_version: assigned.as_ref().and_then(|(_, parent)| parent.clone()),
            extra: Default::default(),
        };
        self.store.write_sidecar(&record)?;

        self.strategy.record_backup(
            &mut state,
            HistoryRecord {
                name: name.clone(),
                kind: rec.kind,
                created_at: now,
                size_bytes,
            },
        )?;

        if let Some((version, parent)) = assigned {
            self.versions.record_version(
                &name,
                &version,
                &versioning.tags,
                versioning.description.as_deref(),
                parent,
                now,
            )?;
        }

        if !self.quiet {
            println!(
                "Backup complete: {} ({}, {}, {:.1}s)",
                payload_path.display(),
                rec.kind,
                format_file_size(size_bytes),
                out.elapsed.as_secs_f64()
            );
        }
        Ok(name)
    }

    /// Restores an artifact: explicit path, or interactive selection.
    pub async fn restore(&self, explicit: Option<PathBuf>) -> Result<()> {
        let (path, sidecar) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(OrchestratorError::ValidationFailed(format!(
                        "'{}' does not exist",
                        path.display()
                    )));
                }
                let sidecar = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|name| self.store.read_sidecar(name).ok().flatten());
                (path, sidecar)
            }
            None => {
                let artifacts = self.store.list()?;
                let mut input = std::io::stdin().lock();
                let mut output = std::io::stdout();
                let idx = select_artifact(&artifacts, &mut input, &mut output)?;
                let chosen = &artifacts[idx];
                (chosen.path.clone(), chosen.sidecar.clone())
            }
        };

        ArtifactStore::validate_payload(&path)?;

        let handler = self.resolve_handler().await?;
        let (target, identity) = self.resolve_running_target(&handler).await?;

        let size_bytes = std::fs::metadata(&path)?.len();
        println!("Backup to restore: {}", path.display());
        println!("  size:     {}", format_file_size(size_bytes));
        if let Some(sc) = &sidecar {
            println!("  kind:     {}", sc.kind);
            println!("  created:  {}", sc.created_at.format("%Y-%m-%d %H:%M:%S"));
        }
        println!("  database: {}", self.db.database);
        println!("  target:   {identity} ({})", handler.backend_name());

        if self.assume_yes {
            info!("confirmation bypassed by --yes");
        } else {
            let mut input = std::io::stdin().lock();
            let mut output = std::io::stdout();
            confirm_restore(&mut input, &mut output)?;
        }

        let payload = std::fs::File::open(&path)?;
        let argv = restore_command(&self.db.user, &self.db.database);
        info!("streaming '{}' into psql", path.display());
        let out = handler
            .exec(
                &target,
                &argv,
                &self.pg_env(),
                StdinSource::File(payload),
                StdoutSink::Captured,
                RESTORE_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Err(OrchestratorError::ExecNonZero {
                exit: out.exit_code,
                stderr: summarize_stderr(&out.stderr),
            });
        }

        let probe = verify_command(&self.db.user, &self.db.database);
        match handler
            .exec(
                &target,
                &probe,
                &self.pg_env(),
                StdinSource::Null,
                StdoutSink::Captured,
                VERIFY_TIMEOUT,
            )
            .await
        {
            Ok(v) if v.success() => info!("post-restore verification succeeded"),
            Ok(v) => {
                return Err(OrchestratorError::VerifyFailed(summarize_stderr(&v.stderr)))
            }
            Err(OrchestratorError::ExecTimeout(_)) => {
                return Err(OrchestratorError::VerifyFailed(
                    "verification probe timed out".to_string(),
                ))
            }
            Err(err) => return Err(err),
        }

        if !self.quiet {
            println!("Restore complete: {}", path.display());
        }
        Ok(())
    }

    /// Prints the artifact listing, newest first.
    pub fn list(&self) -> Result<()> {
        let artifacts = self.store.list()?;
        if artifacts.is_empty() {
            println!(
                "No backup files found in {}",
                self.store.backup_dir().display()
            );
            return Ok(());
        }
        println!("Backup files in {}:", self.store.backup_dir().display());
        println!("{}", "-".repeat(72));
        for artifact in &artifacts {
            let kind = artifact
                .sidecar
                .as_ref()
                .map(|sc| sc.kind.to_string())
                .unwrap_or_else(|| "legacy".to_string());
            println!(
                "{:<36} {:>10}  {:<11} {}",
                artifact.name,
                format_file_size(artifact.size_bytes),
                kind,
                artifact.modified.format("%Y-%m-%d %H:%M:%S")
            );
        }
        Ok(())
    }

    /// Retention counts, totals, per-kind listing and the next recommendation.
    pub fn summary(&self) -> Result<()> {
        let artifacts = self.store.list()?;
        let state = self.strategy.reconcile(&self.store)?;
        let policy = self.retention.policy();

        let mut per_bucket = std::collections::BTreeMap::new();
        let mut fulls = 0usize;
        let mut total_bytes = 0u64;
        for artifact in &artifacts {
            total_bytes += artifact.size_bytes;
            if let Some(sc) = &artifact.sidecar {
                *per_bucket.entry(sc.retention_bucket).or_insert(0usize) += 1;
                if sc.kind == BackupKind::Full {
                    fulls += 1;
                }
            }
        }

        println!("Retention policies:");
        for bucket in [
            RetentionBucket::Daily,
            RetentionBucket::Weekly,
            RetentionBucket::Monthly,
        ] {
            let current = per_bucket.get(&bucket).copied().unwrap_or(0);
            println!("  {:<8} {}/{}", bucket, current, policy.limit(bucket));
        }
        println!("  {:<8} {}/{}", "full", fulls, policy.full);

        println!();
        println!(
            "Totals: {} backups, {}",
            artifacts.len(),
            format_file_size(total_bytes)
        );

        for kind in [BackupKind::Full, BackupKind::Incremental] {
            let of_kind: Vec<_> = artifacts
                .iter()
                .filter(|a| a.sidecar.as_ref().is_some_and(|sc| sc.kind == kind))
                .collect();
            if of_kind.is_empty() {
                continue;
            }
            println!();
            println!("{} ({}):", kind, of_kind.len());
            for artifact in of_kind.iter().take(3) {
                println!(
                    "  {} - {} ({})",
                    artifact.name,
                    artifact.modified.format("%Y-%m-%d %H:%M"),
                    format_file_size(artifact.size_bytes)
                );
            }
            if of_kind.len() > 3 {
                println!("  ... and {} more", of_kind.len() - 3);
            }
        }

        let rec = self
            .strategy
            .decide(&state, RequestedKind::Auto, utc_now_secs());
        println!();
        println!("Next recommended backup: {} ({})", rec.kind, rec.reason);
        Ok(())
    }

    /// Applies (or simulates) retention pruning.
    pub fn apply_retention(&self, dry_run: bool) -> Result<()> {
        let _lock = self.store.lock()?;
        let artifacts = self.store.list()?;
        let plan = self.retention.apply(&self.store, &artifacts, dry_run)?;

        if plan.is_empty() {
            println!("No backups exceed the retention limits");
            return Ok(());
        }
        println!(
            "{}:",
            if dry_run {
                "Backups to delete"
            } else {
                "Deleted backups"
            }
        );
        for (bucket, count) in &plan.deleted_per_bucket {
            println!("  {bucket}: {count}");
        }
        println!("  total: {}", plan.delete.len());
        if dry_run {
            println!("Run with --apply-retention to delete these backups");
        }
        Ok(())
    }

    pub fn list_versions(
        &self,
        branch: Option<&str>,
        tag: Option<&str>,
        limit: Option<usize>,
    ) -> Result<()> {
        let entries = self.versions.list(branch, tag, limit);
        if entries.is_empty() {
            println!("No versions recorded");
            return Ok(());
        }
        for entry in &entries {
            let tags = if entry.tags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", entry.tags.join(", "))
            };
            println!(
                "{}  {}  {}{}",
                entry.version,
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.artifact,
                tags
            );
        }
        Ok(())
    }

    pub fn version_info(&self, version: &str) -> Result<()> {
        let entry = self.versions.info(version).ok_or_else(|| {
            OrchestratorError::ValidationFailed(format!("version not found: {version}"))
        })?;
        println!("Version:  {}", entry.version);
        println!("Backup:   {}", entry.artifact);
        println!("Branch:   {}", entry.branch);
        println!("Created:  {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
        if !entry.tags.is_empty() {
            println!("Tags:     {}", entry.tags.join(", "));
        }
        if let Some(parent) = &entry.parent {
            println!("Parent:   {parent}");
        }
        if let Some(description) = &entry.description {
            println!("Note:     {description}");
        }
        if let Some(sc) = self.store.read_sidecar(&entry.artifact)? {
            println!("Kind:     {}", sc.kind);
            println!("Size:     {}", format_file_size(sc.size_bytes));
        }
        Ok(())
    }

    pub fn compare_versions(&self, first: &str, second: &str) -> Result<()> {
        let cmp = self.versions.compare(first, second)?;
        let newer = if cmp.first_is_newer {
            &cmp.first
        } else {
            &cmp.second
        };
        println!("Newer:        {newer}");
        println!("Same branch:  {}", cmp.same_branch);
        println!("Compatible:   {}", cmp.compatible);

        let size_of = |version: &str| -> Option<u64> {
            let entry = self.versions.info(version)?;
            self.store
                .read_sidecar(&entry.artifact)
                .ok()
                .flatten()
                .map(|sc| sc.size_bytes)
        };
        if let (Some(a), Some(b)) = (size_of(first), size_of(second)) {
            let delta = a as i64 - b as i64;
            println!("Size delta:   {delta} bytes");
        }
        Ok(())
    }

    pub fn create_tag(&self, version: &str, tag: &str, description: Option<&str>) -> Result<()> {
        let _lock = self.store.lock()?;
        self.versions.create_tag(version, tag, description)?;
        if !self.quiet {
            println!("Tagged {version} as '{tag}'");
        }
        Ok(())
    }

    pub fn list_tags(&self) -> Result<()> {
        let tags = self.versions.load_tags();
        if tags.is_empty() {
            println!("No tags recorded");
            return Ok(());
        }
        for (tag, versions) in &tags {
            println!("{tag}:");
            for version in versions {
                println!("  {version}");
            }
        }
        Ok(())
    }

    pub fn list_branches(&self) -> Result<()> {
        let branches = self.versions.load_branches();
        if branches.is_empty() {
            println!("No branches recorded");
            return Ok(());
        }
        for (name, info) in &branches {
            let last = info
                .last_backup
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!("{name}: {} backups, last {last}", info.backup_count);
            if !info.description.is_empty() {
                println!("  {}", info.description);
            }
        }
        Ok(())
    }

    pub fn show_rollback_history(&self) -> Result<()> {
        let history = self.versions.rollback_history();
        if history.is_empty() {
            println!("No rollbacks recorded");
            return Ok(());
        }
        for entry in &history {
            println!(
                "{}  -> {}  (safety backup: {})",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.target_version,
                entry.safety_backup
            );
        }
        Ok(())
    }

    /// Rolls back to a recorded version: safety backup first, then restore,
    /// then the ledger entry.
    pub async fn rollback_to(&self, version: &str) -> Result<()> {
        let entry = self.versions.info(version).ok_or_else(|| {
            OrchestratorError::ValidationFailed(format!("version not found: {version}"))
        })?;
        let payload = self.store.payload_path(&entry.artifact);
        ArtifactStore::validate_payload(&payload)?;

        let now = utc_now_secs();
        info!("creating safety backup before rolling back to {version}");
        let safety = self
            .backup(
                &BackupRequest {
                    name: Some(format!("pre_rollback_{}", now.format("%Y%m%d_%H%M%S"))),
                    overwrite: false,
                    requested: RequestedKind::Full,
                },
                &VersioningRequest {
                    enabled: true,
                    branch: "rollback".to_string(),
                    explicit: None,
                    increment: IncrementLevel::Patch,
                    tags: vec!["safety".to_string()],
                    description: Some(format!("safety backup before rollback to {version}")),
                },
            )
            .await?;

        self.restore(Some(payload)).await?;

        let _lock = self.store.lock()?;
        self.versions
            .record_rollback(version, &safety, utc_now_secs())?;
        if !self.quiet {
            println!("Rollback to {version} complete (safety backup: {safety})");
        }
        Ok(())
    }

    /// Drops old versions beyond `keep` per branch, deleting their artifacts.
    pub fn cleanup_versions(&self, keep: usize, dry_run: bool) -> Result<()> {
        let _lock = self.store.lock()?;
        let doomed = self.versions.cleanup(keep, dry_run)?;
        if doomed.is_empty() {
            println!("No versions to clean up");
            return Ok(());
        }
        for entry in &doomed {
            if dry_run {
                println!("would delete {} ({})", entry.version, entry.artifact);
            } else {
                self.store.delete(&entry.artifact)?;
                println!("deleted {} ({})", entry.version, entry.artifact);
            }
        }
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
