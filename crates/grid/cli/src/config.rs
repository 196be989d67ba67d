//! Configuration for gridctl

use std::path::PathBuf;

use grid_ledger::{RpcConfig, ViewConfig};
use grid_session::SessionConfig;
use grid_types::ProgramIds;
use serde::{Deserialize, Serialize};

/// Environment variable holding the cache sealing passphrase. Never read
/// from the config file.
pub const PASSPHRASE_ENV: &str = "GRIDLINE_CACHE_PASSPHRASE";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Primary ledger endpoint
    #[serde(default = "default_primary")]
    pub primary: RpcConfig,

    /// Rollup endpoint
    #[serde(default = "default_rollup")]
    pub rollup: RpcConfig,

    /// Program ids
    #[serde(default)]
    pub programs: ProgramIds,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Session key cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Dual-ledger view
    #[serde(default)]
    pub view: ViewConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            rollup: default_rollup(),
            programs: ProgramIds::default(),
            session: SessionConfig::default(),
            cache: CacheConfig::default(),
            view: ViewConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Session key cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Base directory. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Seal cached keys with a passphrase from the environment
    #[serde(default)]
    pub sealed: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_primary() -> RpcConfig {
    RpcConfig::new("http://127.0.0.1:8899")
}

fn default_rollup() -> RpcConfig {
    RpcConfig::new("http://127.0.0.1:7799")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GridConfig {
    /// Defaults, then the optional file, then `GRIDLINE_`-prefixed
    /// environment variables (`GRIDLINE_PRIMARY__URL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&GridConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GRIDLINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GridConfig::default();
        assert_eq!(config.primary.url, "http://127.0.0.1:8899");
        assert_eq!(config.rollup.url, "http://127.0.0.1:7799");
        assert_eq!(config.programs, ProgramIds::default());
        assert!(!config.cache.sealed);
        assert!(config.cache.dir.is_none());
    }

    #[test]
    fn test_load_without_file() {
        let config = GridConfig::load(None).unwrap();
        assert_eq!(config.session.fee_reserve_lamports, 10_000_000);
        assert_eq!(config.view.roster_interval_secs, 5);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridline.toml");
        std::fs::write(
            &path,
            r#"
[primary]
url = "https://api.devnet.example"

[session]
origin = "https://grid.example"
fee_reserve_lamports = 5000

[cache]
sealed = true
"#,
        )
        .unwrap();

        let config = GridConfig::load(path.to_str()).unwrap();
        assert_eq!(config.primary.url, "https://api.devnet.example");
        assert_eq!(config.primary.commitment, "confirmed");
        assert_eq!(config.session.origin, "https://grid.example");
        assert_eq!(config.session.fee_reserve_lamports, 5000);
        assert_eq!(config.session.escalation_threshold, 3);
        assert!(config.cache.sealed);
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let config = GridConfig::load(Some("/nonexistent/gridline")).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
