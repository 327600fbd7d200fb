//! Exit code logic for the mirror process.
//!
//! Single responsibility: map a run summary to the process exit outcome.

use registry_mirror::MirrorReport;

use crate::ProcessExit;

/// Determines the process exit outcome from a mirror report.
///
/// Interruption wins over everything else. Units skipped because an earlier
/// run completed them count as completed.
pub(crate) fn determine_exit_outcome(report: &MirrorReport) -> ProcessExit {
    if report.interrupted {
        return ProcessExit::Interrupted;
    }
    outcome_from_counts(report.completed + report.skipped, report.failed)
}

fn outcome_from_counts(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
