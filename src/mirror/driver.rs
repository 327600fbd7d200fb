//! Sequential mirror driver.

use std::sync::Arc;

use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{MirrorError, MirrorOptions, MirrorReport, UnitState};
use crate::artifact::{Artifact, UnitId};
use crate::download::{FetchOutcome, HttpClient, ResumableFetcher};
use crate::progress::ProgressStore;
use crate::registry::Registry;

/// Mirrors artifacts one unit at a time, recording each completed unit.
///
/// ```no_run
/// use std::sync::Arc;
/// use registry_mirror::{
///     Endpoints, HttpClient, HttpSettings, MirrorDriver, MirrorOptions, ProgressStore,
///     RateLimiter, RegistryKind, ResumableFetcher, RetryPolicy, build_registry, load_listing,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(&HttpSettings::default(), Arc::new(RateLimiter::disabled()))?;
/// let registry = build_registry(RegistryKind::Crates, &Endpoints::default(), None);
/// let fetcher = ResumableFetcher::new(client.clone(), RetryPolicy::default());
/// let options = MirrorOptions { mirror_root: "mirror".into(), ..MirrorOptions::default() };
/// let progress = ProgressStore::load("mirror/.mirror-progress.json".as_ref())?;
///
/// let mut driver = MirrorDriver::new(registry, client, fetcher, progress, options);
/// let artifacts = load_listing("crates.json".as_ref())?;
/// let report = driver.run(&artifacts, &CancellationToken::new()).await?;
/// println!("{} completed, {} failed", report.completed, report.failed);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MirrorDriver {
    registry: Arc<dyn Registry>,
    client: HttpClient,
    fetcher: ResumableFetcher,
    progress: ProgressStore,
    options: MirrorOptions,
    progress_bar: Option<ProgressBar>,
}

impl MirrorDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(
        registry: Arc<dyn Registry>,
        client: HttpClient,
        fetcher: ResumableFetcher,
        progress: ProgressStore,
        options: MirrorOptions,
    ) -> Self {
        Self {
            registry,
            client,
            fetcher,
            progress,
            options,
            progress_bar: None,
        }
    }

    /// Reports per-artifact progress on `bar`.
    #[must_use]
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// The progress record as updated by the run.
    #[must_use]
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Mirrors every unit of `artifacts` in listing order.
    ///
    /// `cancel` is checked between units; a transfer in flight is never cut
    /// short. Failed units are logged and left out of the progress record.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Progress`] when a completed unit cannot be
    /// recorded. Every other failure is reported per unit.
    #[instrument(skip_all, fields(registry = %self.registry.kind(), artifacts = artifacts.len()))]
    pub async fn run(
        &mut self,
        artifacts: &[Artifact],
        cancel: &CancellationToken,
    ) -> Result<MirrorReport, MirrorError> {
        let mut report = MirrorReport::default();

        let start = self.start_index(artifacts);
        report.artifacts_passed = start;
        let remaining = &artifacts[start..];

        if let Some(bar) = &self.progress_bar {
            bar.set_length(remaining.len() as u64);
        }

        'artifacts: for artifact in remaining {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if let Some(bar) = &self.progress_bar {
                bar.set_message(artifact.id());
            }

            let versions = self.versions_for(artifact, &mut report).await;
            for version in &versions {
                if cancel.is_cancelled() {
                    report.interrupted = true;
                    break 'artifacts;
                }

                let unit = artifact.unit(version);
                if self.progress.is_complete(&unit) {
                    debug!(unit = %unit, "already recorded, skipping");
                    report.record(unit, UnitState::Skipped, None);
                    continue;
                }

                transition(&unit, UnitState::Pending, UnitState::Fetching);
                match self.fetch_unit(artifact, version, &mut report).await {
                    Ok(()) => {
                        self.progress.mark_complete(&unit)?;
                        transition(&unit, UnitState::Fetching, UnitState::Complete);
                        info!(unit = %unit, "unit complete");
                        report.record(unit, UnitState::Complete, None);
                    }
                    Err(reason) => {
                        transition(&unit, UnitState::Fetching, UnitState::Failed);
                        error!(unit = %unit, %reason, "unit failed");
                        report.record(unit, UnitState::Failed, Some(reason));
                    }
                }
            }

            if let Some(bar) = &self.progress_bar {
                bar.inc(1);
            }
        }

        if report.interrupted {
            warn!(
                completed = report.completed,
                "interrupted, progress saved up to the last completed unit"
            );
        }
        info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            missing_optional = report.missing_optional,
            "mirror run finished"
        );
        Ok(report)
    }

    fn start_index(&self, artifacts: &[Artifact]) -> usize {
        let Some(start_from) = self.options.start_from.as_deref() else {
            return 0;
        };
        let found = artifacts
            .iter()
            .position(|a| a.id() == start_from || a.name == start_from);
        if let Some(index) = found {
            info!(start_from, index, "starting from listed artifact");
            index
        } else {
            warn!(start_from, "start artifact not in listing, starting from the first");
            0
        }
    }

    async fn versions_for(&self, artifact: &Artifact, report: &mut MirrorReport) -> Vec<String> {
        let selection = self.options.versions;
        if !selection.is_active() {
            return artifact.versions.clone();
        }

        let registry = &self.registry;
        let client = &self.client;
        let resolved = self
            .fetcher
            .policy()
            .execute(&artifact.id(), |_| {
                registry.resolve_versions(client, artifact, selection)
            })
            .await;

        match resolved {
            Ok(versions) if !versions.is_empty() => {
                debug!(artifact = %artifact.id(), ?versions, "resolved versions");
                if let Some(change) = report.record_resolution(artifact, &versions) {
                    info!(
                        artifact = %artifact.id(),
                        old = %change.old_version,
                        new = %change.new_version,
                        "newer version available"
                    );
                }
                versions
            }
            Ok(_) => {
                warn!(artifact = %artifact.id(), "registry returned no versions, using listed ones");
                artifact.versions.clone()
            }
            Err(error) => {
                warn!(artifact = %artifact.id(), %error, "version lookup failed, using listed ones");
                artifact.versions.clone()
            }
        }
    }

    /// Fetches every task of one unit in role order.
    ///
    /// Returns the failure reason when the unit cannot be completed.
    async fn fetch_unit(
        &self,
        artifact: &Artifact,
        version: &str,
        report: &mut MirrorReport,
    ) -> Result<(), String> {
        let mut tasks = self
            .registry
            .tasks(&self.options.mirror_root, artifact, version)
            .map_err(|e| format!("cannot derive download tasks: {e}"))?;
        tasks.sort_by_key(|task| task.role);

        for task in &tasks {
            match self.fetcher.fetch_task(task).await {
                Ok(FetchOutcome::Missing) if task.required => {
                    return Err(format!("required {} file missing: {}", task.role, task.url));
                }
                Ok(FetchOutcome::Missing) => {
                    debug!(url = %task.url, "optional file not published");
                    report.missing_optional += 1;
                }
                Ok(outcome) => debug!(url = %task.url, ?outcome, "task done"),
                Err(error) if error.is_local_io() => {
                    return Err(format!("local filesystem error: {error}"));
                }
                Err(error) => return Err(error.to_string()),
            }
        }
        Ok(())
    }
}

fn transition(unit: &UnitId, from: UnitState, to: UnitState) {
    debug!(unit = %unit, %from, %to, "unit state");
}
