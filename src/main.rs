use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use pgkeeper::cli::Cli;
use pgkeeper::config::{parse_labels, resolve_backup_dir, DbConfig};
use pgkeeper::orchestrator::{BackupRequest, Orchestrator, TargetOptions};
use pgkeeper::retention::RetentionPolicy;
use pgkeeper::runner::{spawn_signal_listener, CommandRunner};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format_timestamp(None)
        .format_target(false)
        .filter_level(level);
    if cli.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    let _ = builder.try_init();
}

async fn run(cli: Cli) -> pgkeeper::Result<()> {
    let db = DbConfig::from_env();
    let backup_dir = resolve_backup_dir(cli.dir.clone());
    let labels = match &cli.labels {
        Some(raw) => parse_labels(raw)?,
        None => Vec::new(),
    };
    let target = TargetOptions {
        container: cli.container.clone(),
        pod: cli.pod.clone(),
        namespace: cli.namespace.clone(),
        labels,
        k8s_container: cli.k8s_container.clone(),
        forced: cli.forced_environment(),
    };

    let defaults = RetentionPolicy::default();
    let policy = RetentionPolicy {
        daily: cli.retention_daily.unwrap_or(defaults.daily),
        weekly: cli.retention_weekly.unwrap_or(defaults.weekly),
        monthly: cli.retention_monthly.unwrap_or(defaults.monthly),
        full: cli.retention_full.unwrap_or(defaults.full),
    };

    let runner = CommandRunner::new(spawn_signal_listener());
    let orchestrator = Orchestrator::new(
        db,
        &backup_dir,
        target,
        policy,
        cli.quiet,
        cli.yes,
        runner,
    )?;

    if cli.backup_summary {
        return orchestrator.summary();
    }
    if cli.apply_retention || cli.retention_dry_run {
        return orchestrator.apply_retention(cli.retention_dry_run);
    }
    if cli.list {
        return orchestrator.list();
    }
    if cli.list_versions {
        return orchestrator.list_versions(
            cli.filter_branch.as_deref(),
            cli.filter_tag.as_deref(),
            cli.limit,
        );
    }
    if let Some(version) = &cli.version_info {
        return orchestrator.version_info(version);
    }
    if let Some(pair) = &cli.compare_versions {
        return orchestrator.compare_versions(&pair[0], &pair[1]);
    }
    if cli.list_branches {
        return orchestrator.list_branches();
    }
    if cli.list_tags {
        return orchestrator.list_tags();
    }
    if let Some(args) = &cli.create_tag {
        return orchestrator.create_tag(&args[0], &args[1], cli.description.as_deref());
    }
    if cli.rollback_history {
        return orchestrator.show_rollback_history();
    }
    if let Some(version) = &cli.rollback_to {
        return orchestrator.rollback_to(version).await;
    }
    if let Some(keep) = cli.cleanup_versions {
        return orchestrator.cleanup_versions(keep, cli.cleanup_dry_run);
    }
    if cli.restore || cli.restore_file.is_some() {
        return orchestrator.restore(cli.restore_file.clone()).await;
    }

    let request = BackupRequest {
        name: cli.name.clone(),
        overwrite: cli.force,
        requested: cli.requested_kind(),
    };
    let versioning = cli.versioning_request();
    orchestrator.backup(&request, &versioning).await.map(|_| ())
}
