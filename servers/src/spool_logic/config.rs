use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Spoolman filament tracking server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SPOOL_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "SPOOL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SPOOL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SPOOL_LOG_LEVEL", help = "Logging level (debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SPOOL_SPOOLMAN_URL", help = "Base URL of the Spoolman instance, e.g. http://spoolman.local:7912.")]
    pub spoolman_url: Option<String>,

    #[clap(long, env = "SPOOL_SYNC_RATE_SECONDS", help = "Minimum seconds between usage sync attempts (minimum 1).")]
    pub sync_rate_seconds: Option<u64>,

    #[clap(long, env = "SPOOL_RECONNECT_DELAY_SECONDS", help = "Fixed delay in seconds before reconnecting the Spoolman stream.")]
    pub reconnect_delay_seconds: Option<u64>,

    #[clap(long, env = "SPOOL_KLIPPY_URL", help = "Websocket URL of the machine controller position feed.")]
    pub klippy_url: Option<String>,

    #[clap(long, env = "SPOOL_STATE_PATH", help = "Path of the JSON file persisting the active spool selection.")]
    pub state_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            spoolman_url: other.spoolman_url.or(self.spoolman_url),
            sync_rate_seconds: other.sync_rate_seconds.or(self.sync_rate_seconds),
            reconnect_delay_seconds: other.reconnect_delay_seconds.or(self.reconnect_delay_seconds),
            klippy_url: other.klippy_url.or(self.klippy_url),
            state_path: other.state_path.or(self.state_path),
        }
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(7125),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        sync_rate_seconds: Some(5),
        reconnect_delay_seconds: Some(2),
        klippy_url: Some("ws://127.0.0.1:7810/websocket".to_string()),
        ..Default::default()
    };

    // 2. Load from config file (server_spool.conf) if present.
    //    Allow overriding the default config file path with a CLI arg.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_spool.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    }

    // 3. Override with environment variables and CLI arguments, which clap
    //    has already folded together.
    current_config = current_config.merge(cli_args);

    // 4. Default the state file next to the user's data, like the rest of
    //    the persistent machine state.
    if current_config.state_path.is_none() {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        current_config.state_path = Some(base.join("server_spool").join("active_spool.json"));
    }

    // sync_rate has a minimum of one second.
    if let Some(rate) = current_config.sync_rate_seconds {
        current_config.sync_rate_seconds = Some(rate.max(1));
    }

    current_config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_override_values() {
        let base = Config {
            port: Some(7125),
            log_level: Some("info".into()),
            spoolman_url: Some("http://old".into()),
            ..Default::default()
        };
        let over = Config {
            spoolman_url: Some("http://new".into()),
            sync_rate_seconds: Some(30),
            ..Default::default()
        };
        let merged = base.merge(over);
        assert_eq!(merged.port, Some(7125));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
        assert_eq!(merged.spoolman_url.as_deref(), Some("http://new"));
        assert_eq!(merged.sync_rate_seconds, Some(30));
    }

    #[test]
    fn test_config_file_round_trip() {
        let config = Config {
            port: Some(9000),
            spoolman_url: Some("http://spoolman.local".into()),
            sync_rate_seconds: Some(10),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, Some(9000));
        assert_eq!(parsed.spoolman_url.as_deref(), Some("http://spoolman.local"));
        assert_eq!(parsed.sync_rate_seconds, Some(10));
    }
}
