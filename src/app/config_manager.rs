//! Configuration lifecycle: load file config, merge CLI, resolve transport settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use registry_mirror::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_RATE_LIMIT_MS, READ_TIMEOUT_SECS,
};
use registry_mirror::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, Endpoints, HttpSettings, RetryPolicy};

use crate::app_config::{FileConfig, VerbositySetting, load_config};
use crate::cli::Cli;

/// Settings shared by both subcommands after merging
/// built-in defaults < config file < CLI flags.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) http: HttpSettings,
    pub(crate) retry: RetryPolicy,
    pub(crate) rate_limit: Duration,
    pub(crate) endpoints: Endpoints,
    pub(crate) mirror_root: Option<PathBuf>,
    pub(crate) log_level: &'static str,
    pub(crate) quiet: bool,
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) loaded_from_file: bool,
}

/// Loads the config file named by `--config` (or the default one) and merges
/// the CLI flags over it.
pub(crate) fn resolve_config(cli: &Cli) -> Result<ResolvedConfig> {
    let loaded = load_config(cli.config.as_deref())?;
    let mut resolved = merge(cli, loaded.config.as_ref());
    resolved.config_path = loaded.path;
    resolved.loaded_from_file = loaded.loaded_from_file;
    Ok(resolved)
}

fn merge(cli: &Cli, file: Option<&FileConfig>) -> ResolvedConfig {
    let file_default = FileConfig::default();
    let file = file.unwrap_or(&file_default);

    let defaults = HttpSettings::default();
    let http = HttpSettings {
        connect_timeout: Duration::from_secs(
            file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        ),
        read_timeout: Duration::from_secs(file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
        user_agent: file.user_agent.clone().unwrap_or(defaults.user_agent),
    };

    let max_attempts = cli
        .max_retries
        .or(file.max_retries)
        .unwrap_or(DEFAULT_MAX_RETRIES);
    let delay = cli
        .retry_delay_ms
        .or(file.retry_delay_ms)
        .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis);
    let rate_limit_ms = cli
        .rate_limit
        .or(file.rate_limit_ms)
        .unwrap_or(DEFAULT_RATE_LIMIT_MS);

    ResolvedConfig {
        http,
        retry: RetryPolicy::new(max_attempts, delay),
        rate_limit: Duration::from_millis(rate_limit_ms),
        endpoints: file.endpoints.clone().unwrap_or_default(),
        mirror_root: file.mirror_root.clone(),
        log_level: resolve_default_log_level(cli, file),
        quiet: cli.quiet
            || (cli.verbose == 0 && file.verbosity == Some(VerbositySetting::Quiet)),
        config_path: None,
        loaded_from_file: false,
    }
}

/// Priority (below `RUST_LOG`): `--quiet` > `-v/-vv` > config verbosity > info.
pub(crate) fn resolve_default_log_level(cli: &Cli, file: &FileConfig) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => file.verbosity.map_or("info", |v| v.log_level()),
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(extra: &[&str]) -> Cli {
        let mut argv = vec!["registry-mirror"];
        argv.extend_from_slice(extra);
        argv.extend_from_slice(&["list", "--registry", "crates", "--output", "out.json"]);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_merge_uses_builtin_defaults() {
        let resolved = merge(&parse(&[]), None);
        assert_eq!(resolved.retry.max_attempts(), DEFAULT_MAX_RETRIES);
        assert_eq!(resolved.retry.delay(), DEFAULT_RETRY_DELAY);
        assert_eq!(resolved.rate_limit, Duration::from_millis(DEFAULT_RATE_LIMIT_MS));
        assert_eq!(resolved.endpoints, Endpoints::default());
        assert_eq!(resolved.log_level, "info");
        assert!(!resolved.quiet);
    }

    #[test]
    fn test_merge_file_overrides_defaults() {
        let file = FileConfig {
            max_retries: Some(7),
            retry_delay_ms: Some(10),
            rate_limit_ms: Some(0),
            read_timeout_secs: Some(42),
            user_agent: Some("corp-mirror/1.0".to_string()),
            mirror_root: Some(PathBuf::from("/srv/mirror")),
            ..FileConfig::default()
        };
        let resolved = merge(&parse(&[]), Some(&file));
        assert_eq!(resolved.retry.max_attempts(), 7);
        assert_eq!(resolved.retry.delay(), Duration::from_millis(10));
        assert_eq!(resolved.rate_limit, Duration::ZERO);
        assert_eq!(resolved.http.read_timeout, Duration::from_secs(42));
        assert_eq!(resolved.http.user_agent, "corp-mirror/1.0");
        assert_eq!(resolved.mirror_root, Some(PathBuf::from("/srv/mirror")));
    }

    #[test]
    fn test_merge_cli_overrides_file() {
        let file = FileConfig {
            max_retries: Some(7),
            rate_limit_ms: Some(5000),
            ..FileConfig::default()
        };
        let resolved = merge(&parse(&["--max-retries", "2", "--rate-limit", "100"]), Some(&file));
        assert_eq!(resolved.retry.max_attempts(), 2);
        assert_eq!(resolved.rate_limit, Duration::from_millis(100));
    }

    #[test]
    fn test_log_level_priority() {
        let quiet_file = FileConfig {
            verbosity: Some(VerbositySetting::Quiet),
            ..FileConfig::default()
        };
        assert_eq!(resolve_default_log_level(&parse(&[]), &quiet_file), "error");
        assert_eq!(resolve_default_log_level(&parse(&["-v"]), &quiet_file), "debug");
        assert_eq!(resolve_default_log_level(&parse(&["-vv"]), &FileConfig::default()), "trace");
        assert_eq!(resolve_default_log_level(&parse(&["-q", "-v"]), &FileConfig::default()), "error");
    }

    #[test]
    fn test_config_quiet_hides_progress_unless_verbose() {
        let quiet_file = FileConfig {
            verbosity: Some(VerbositySetting::Quiet),
            ..FileConfig::default()
        };
        assert!(merge(&parse(&[]), Some(&quiet_file)).quiet);
        assert!(!merge(&parse(&["-v"]), Some(&quiet_file)).quiet);
    }

    #[test]
    fn test_resolve_config_reads_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mirror.toml");
        std::fs::write(&path, "retry_delay_ms = 0\n").unwrap();
        let path_arg = path.to_string_lossy().into_owned();
        let cli = parse(&["--config", &path_arg]);
        let resolved = resolve_config(&cli).unwrap();
        assert_eq!(resolved.retry.delay(), Duration::ZERO);
        assert!(resolved.loaded_from_file);
        assert_eq!(resolved.config_path, Some(path));
    }
}
