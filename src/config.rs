use std::fmt;

use config::{Config, Environment, File, FileFormat};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::config::GridConfig;
use crate::grid::errors::GridResult;
use crate::grid::paper::PaperConfig;

/// Environment prefix; `GRID_BOT__GRID__LEVERAGE=3` overrides `grid.leverage`
pub const ENV_PREFIX: &str = "GRID_BOT";

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Ladder, thresholds and call behaviour
    pub grid: GridConfig,
    /// Exchange credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Simulated venue parameters
    #[serde(default)]
    pub paper: PaperConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Opaque credential material, never printed
#[derive(Clone, Default, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ExchangeConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> GridResult<Self> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            // Environment overrides the file
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides
    pub fn from_toml_str(toml: &str) -> GridResult<Self> {
        let settings: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> GridResult<()> {
        self.grid.validate()?;
        self.paper.validate()
    }
}
