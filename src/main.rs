//! CLI entry point for the registry mirror.

mod app;
mod app_config;
mod cli;

/// Process exit outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything requested finished.
    Success,
    /// Some units failed, others completed.
    Partial,
    /// Nothing completed or a fatal error occurred.
    Failure,
    /// Stopped by Ctrl-C; progress up to the last completed unit is saved.
    Interrupted,
}

impl ProcessExit {
    fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
            Self::Interrupted => 130,
        }
    }
}

#[tokio::main]
async fn main() {
    let exit = match app::runtime::run_mirror_tool().await {
        Ok(exit) => exit,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Failure
        }
    };
    std::process::exit(exit.code());
}
