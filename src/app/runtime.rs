use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use registry_mirror::{
    Artifact, DEFAULT_PROGRESS_FILE, Enumerator, HttpClient, MirrorDriver, MirrorOptions,
    MirrorReport, ProgressStore, RateLimiter, ResumableFetcher, VersionSelection, build_registry,
    load_listing_for, write_listing, write_updated_listing, write_version_changes,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::config_manager::{self, ResolvedConfig};
use crate::app::{exit_handler, progress_manager, terminal};
use crate::cli::{Cli, Command, ListArgs, MirrorArgs};

/// Default name of the version change record, next to the listing.
const CHANGED_VERSIONS_FILE: &str = "changed-versions.json";

pub(crate) async fn run_mirror_tool() -> Result<ProcessExit> {
    let cli = Cli::parse();
    let resolved = config_manager::resolve_config(&cli)?;

    terminal::init_tracing(resolved.log_level, terminal::is_no_color_requested());
    debug!(?cli, "CLI arguments parsed");
    if resolved.loaded_from_file {
        debug!(path = ?resolved.config_path, "loaded config file");
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_listener(cancel.clone());

    match &cli.command {
        Command::List(args) => run_list(args, &resolved, &cancel).await,
        Command::Mirror(args) => run_mirror(args, &resolved, &cancel).await,
    }
}

/// Cancels `cancel` on the first Ctrl-C.
fn spawn_interrupt_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current unit");
            cancel.cancel();
        }
    });
}

fn build_client(resolved: &ResolvedConfig) -> Result<HttpClient> {
    let limiter = if resolved.rate_limit.is_zero() {
        debug!("rate limiting disabled");
        RateLimiter::disabled()
    } else {
        debug!(rate_limit_ms = resolved.rate_limit.as_millis(), "rate limiting enabled");
        RateLimiter::new(resolved.rate_limit)
    };
    HttpClient::new(&resolved.http, Arc::new(limiter)).context("Failed to build HTTP client")
}

async fn run_list(
    args: &ListArgs,
    resolved: &ResolvedConfig,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    if args.registry.requires_query() && args.query.is_none() {
        bail!("Listing {} requires --query", args.registry);
    }

    let client = build_client(resolved)?;
    let registry = build_registry(args.registry, &resolved.endpoints, args.query.clone());
    let enumerator =
        Enumerator::new(registry, client, resolved.retry.clone()).with_max_pages(args.max_pages);

    info!(registry = %args.registry, output = %args.output.display(), "listing registry");
    let artifacts = tokio::select! {
        result = enumerator.enumerate() => result
            .with_context(|| format!("Failed to enumerate {}", args.registry))?,
        () = cancel.cancelled() => {
            warn!("interrupted, listing file not written");
            return Ok(ProcessExit::Interrupted);
        }
    };

    write_listing(&args.output, &artifacts)
        .with_context(|| format!("Failed to write listing '{}'", args.output.display()))?;
    info!(artifacts = artifacts.len(), output = %args.output.display(), "listing written");
    Ok(ProcessExit::Success)
}

async fn run_mirror(
    args: &MirrorArgs,
    resolved: &ResolvedConfig,
    cancel: &CancellationToken,
) -> Result<ProcessExit> {
    let registry = build_registry(args.registry, &resolved.endpoints, None);
    let artifacts = load_listing_for(&args.listing, registry.as_ref())
        .with_context(|| format!("Failed to read listing '{}'", args.listing.display()))?;

    let mirror_root = args
        .mirror_root
        .clone()
        .or_else(|| resolved.mirror_root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let progress_path = progress_path(&mirror_root, args.progress_file.as_deref());
    let progress = ProgressStore::load(&progress_path)?;

    let client = build_client(resolved)?;
    let fetcher = ResumableFetcher::new(client.clone(), resolved.retry.clone());
    let selection = VersionSelection {
        max_versions: args.max_versions.map(|n| n as usize),
        check_latest: args.check_latest,
    };
    let options = MirrorOptions {
        mirror_root: mirror_root.clone(),
        versions: selection,
        start_from: args.start_from.clone(),
    };

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        resolved.quiet,
        terminal::is_dumb_terminal(),
    );
    let bar = progress_manager::artifact_progress_bar(use_bar);

    info!(
        registry = %args.registry,
        artifacts = artifacts.len(),
        mirror_root = %mirror_root.display(),
        progress_file = %progress_path.display(),
        "mirroring"
    );
    let mut driver = MirrorDriver::new(registry, client, fetcher, progress, options)
        .with_progress_bar(bar.clone());
    let report = driver.run(&artifacts, cancel).await;
    bar.finish_and_clear();
    let report = report.context("Mirror run aborted")?;

    if selection.is_active() {
        write_run_summaries(args, &artifacts, &report, resolved.quiet)?;
    }

    if !resolved.quiet {
        eprintln!(
            "{} completed, {} already mirrored, {} failed, {} optional files missing",
            report.completed, report.skipped, report.failed, report.missing_optional
        );
    }
    Ok(exit_handler::determine_exit_outcome(&report))
}

/// Writes the listing with resolved versions and, when any listed version was
/// superseded, the list of changes.
fn write_run_summaries(
    args: &MirrorArgs,
    artifacts: &[Artifact],
    report: &MirrorReport,
    quiet: bool,
) -> Result<()> {
    let updated_path = summary_path(
        &args.listing,
        args.updated_listing.as_deref(),
        &updated_listing_name(&args.listing),
    );
    write_updated_listing(&updated_path, &report.updated_listing(artifacts)).with_context(|| {
        format!("Failed to write updated listing '{}'", updated_path.display())
    })?;
    info!(path = %updated_path.display(), "updated listing written");

    if report.version_changes.is_empty() {
        return Ok(());
    }
    let changes_path = summary_path(
        &args.listing,
        args.changes_file.as_deref(),
        CHANGED_VERSIONS_FILE,
    );
    write_version_changes(&changes_path, &report.version_changes)
        .context("Failed to write version changes")?;
    if !quiet {
        eprintln!(
            "{} artifacts have newer versions, see {}",
            report.version_changes.len(),
            changes_path.display()
        );
    }
    Ok(())
}

fn updated_listing_name(listing: &Path) -> String {
    let name = listing
        .file_name()
        .map_or_else(|| "listing.json".into(), |name| name.to_string_lossy());
    format!("updated-{name}")
}

/// `explicit`, else `default_name` next to the listing file.
fn summary_path(listing: &Path, explicit: Option<&Path>, default_name: &str) -> PathBuf {
    explicit.map_or_else(|| listing.with_file_name(default_name), Path::to_path_buf)
}

fn progress_path(mirror_root: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| mirror_root.join(DEFAULT_PROGRESS_FILE), Path::to_path_buf)
}
