//! Progress UI (artifact bar) for mirror runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Creates the per-artifact bar; hidden unless `use_bar`.
///
/// The driver sets the length once it knows how many artifacts remain.
pub(crate) fn artifact_progress_bar(use_bar: bool) -> ProgressBar {
    if !use_bar {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
