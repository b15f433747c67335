//! CLI argument definitions for the Reveille daemon.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Reveille: alarms and reminders played on your media devices.
#[derive(Parser, Debug)]
#[command(name = "reveille", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// --config flag > REVEILLE_CONFIG env var > ~/.reveille/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("REVEILLE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// --port flag > REVEILLE_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("REVEILLE_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3040
    }

    /// Data directory with a leading `~` expanded.
    pub fn resolve_data_dir(&self, config_dir: &str) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => expand_home(config_dir),
        }
    }

    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".reveille").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("reveille").chain(list.iter().copied()))
    }

    #[test]
    fn test_flags_override_config() {
        let cli = args(&["--port", "4000", "--data-dir", "/tmp/rv", "-l", "debug"]);
        assert_eq!(cli.resolve_port(3040), 4000);
        assert_eq!(cli.resolve_data_dir("~/.reveille/data"), PathBuf::from("/tmp/rv"));
        assert_eq!(cli.resolve_log_level("info"), "debug");
    }

    #[test]
    fn test_config_path_flag_wins() {
        let cli = args(&["--config", "/etc/reveille.toml"]);
        assert_eq!(cli.resolve_config_path(), PathBuf::from("/etc/reveille.toml"));
    }

    #[test]
    fn test_relative_data_dir_is_kept() {
        let cli = args(&[]);
        assert_eq!(cli.resolve_data_dir("data"), PathBuf::from("data"));
        assert_eq!(cli.resolve_log_level("warn"), "warn");
    }
}
