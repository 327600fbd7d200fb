//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use registry_mirror::RegistryKind;

/// Mirror Maven Central, crates.io, RubyGems or npm artifacts to local disk.
///
/// `list` enumerates a registry into a listing file; `mirror` downloads every
/// listed version, resuming partial files and recording finished units so an
/// interrupted run continues where it stopped.
#[derive(Parser, Debug)]
#[command(name = "registry-mirror")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/registry-mirror/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Attempts per request including the first (1-10)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Fixed delay between attempts in milliseconds (max 60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay_ms: Option<u64>,

    /// Minimum delay between requests to the same host in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, global = true, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Enumerate a registry into a listing file
    List(ListArgs),
    /// Download every unit of a listing file into the mirror
    Mirror(MirrorArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Registry to enumerate (maven, crates, rubygems, npm)
    #[arg(long)]
    pub registry: RegistryKind,

    /// Listing file to write
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Stop after this many listing pages
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Search query (required for rubygems and npm)
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Registry the listing belongs to (maven, crates, rubygems, npm)
    #[arg(long)]
    pub registry: RegistryKind,

    /// Listing file produced by `list`
    #[arg(long, value_name = "FILE")]
    pub listing: PathBuf,

    /// Root directory of the mirror tree
    #[arg(short = 'o', long, value_name = "DIR")]
    pub mirror_root: Option<PathBuf>,

    /// Progress file (default: <mirror root>/.mirror-progress.json)
    #[arg(long, value_name = "FILE")]
    pub progress_file: Option<PathBuf>,

    /// Ask the registry for the newest versions and keep at most N
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_versions: Option<u32>,

    /// Mirror only the latest release instead of the listed versions
    #[arg(long)]
    pub check_latest: bool,

    /// Where to write the listing with resolved versions
    /// (default: updated-<listing file name> next to the listing)
    #[arg(long, value_name = "FILE")]
    pub updated_listing: Option<PathBuf>,

    /// Where to record listed versions that had a newer release
    /// (default: changed-versions.json next to the listing)
    #[arg(long, value_name = "FILE")]
    pub changes_file: Option<PathBuf>,

    /// Skip listed artifacts before this identifier
    #[arg(long, value_name = "ID")]
    pub start_from: Option<String>,
}
