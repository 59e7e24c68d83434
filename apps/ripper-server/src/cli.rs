//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

use ripper_core::AppConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ripper-server",
    about = "Content skeleton ripper server",
    version,
    long_about = "Runs batch analysis jobs that extract hook, value and call-to-action \
                  skeletons from short-form video transcripts and synthesize the patterns \
                  behind them."
)]
pub struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Bind address, overrides `server.host`
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// HTTP server port, overrides `server.port`
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Data directory for jobs, cache and output, overrides `storage.data_dir`
    #[arg(short, long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Command-line values win over file and environment configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from(["ripper-server", "--port", "9000", "--data-dir", "/tmp/r"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/r"));
    }
}
