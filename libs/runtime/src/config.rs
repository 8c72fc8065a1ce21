use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::home_dir::resolve_home_dir;

/// Environment prefix for overrides, e.g. `FARMSYNC__GATEWAY__BASE_URL`.
pub const ENV_PREFIX: &str = "FARMSYNC__";

const DEFAULT_SUBDIR: &str = ".farmsync";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub app: AppSection,
    /// Remote backend endpoint (optional at load time, required to talk to a real backend).
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    /// Logging configuration (optional, uses defaults if None).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppSection {
    pub home_dir: String, // will be normalized to absolute path
}

impl Default for AppSection {
    fn default() -> Self {
        // Empty => `$HOME/.farmsync` (or `%APPDATA%/.farmsync` on Windows)
        Self {
            home_dir: String::new(),
        }
    }
}

/// Unit the remote backend stores `area` in. The core always works in square meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    #[default]
    SquareMeters,
    Hectares,
}

impl AreaUnit {
    const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

    /// Convert a remote value expressed in `self` into square meters.
    pub fn to_square_meters(self, value: f64) -> f64 {
        match self {
            AreaUnit::SquareMeters => value,
            AreaUnit::Hectares => value * Self::SQUARE_METERS_PER_HECTARE,
        }
    }

    /// Convert square meters into the remote unit `self`.
    pub fn from_square_meters(self, value: f64) -> f64 {
        match self {
            AreaUnit::SquareMeters => value,
            AreaUnit::Hectares => value / Self::SQUARE_METERS_PER_HECTARE,
        }
    }
}

/// Hosted backend endpoint and public client key.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Project endpoint, e.g. `https://abc.supabase.co`.
    #[serde(default)]
    pub base_url: String,
    /// Public (anon) client key sent as `apikey`.
    #[serde(default)]
    pub anon_key: String,
    #[serde(default)]
    pub area_unit: AreaUnit,
    /// Per-request timeout; 0 disables it.
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    30
}

/// Fatal startup configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration value '{key}' (set it in the config file or via {env})")]
    Missing { key: &'static str, env: &'static str },

    #[error("invalid configuration value '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl GatewayConfig {
    /// Check both required values are present and the endpoint is a usable URL.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::Missing {
                key: "gateway.base_url",
                env: "FARMSYNC__GATEWAY__BASE_URL",
            });
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "gateway.anon_key",
                env: "FARMSYNC__GATEWAY__ANON_KEY",
            });
        }

        let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
            key: "gateway.base_url",
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid {
                key: "gateway.base_url",
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/farmsync.log", empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/farmsync.log".to_string(),
            file_level: "debug".to_string(),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            gateway: None,
            logging: Some(default_logging_config()),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `app.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::providers::{Format, Yaml};

        let path = config_path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let figment = Self::base_figment().merge(Yaml::file(path));
        Self::extract(figment)
    }

    /// Load configuration from file, or from defaults + environment when no file is given.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut config = Self::extract(Self::base_figment())?;
                config.logging.get_or_insert_with(default_logging_config);
                Ok(config)
            }
        }
    }

    fn base_figment() -> figment::Figment {
        use figment::providers::Serialized;

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            app: AppSection::default(),
            gateway: None,
            logging: None,
        };
        figment::Figment::new().merge(Serialized::defaults(base))
    }

    fn extract(figment: figment::Figment) -> Result<Self> {
        use figment::providers::Env;

        let mut config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract config from figment")?;

        let configured = Some(config.app.home_dir.clone()).filter(|s| !s.trim().is_empty());
        let resolved = resolve_home_dir(configured, DEFAULT_SUBDIR, true)
            .context("Failed to resolve app.home_dir")?;
        config.app.home_dir = resolved.to_string_lossy().to_string();

        Ok(config)
    }

    /// The gateway section, validated. Absence is fatal for a real backend.
    pub fn require_gateway(&self) -> Result<(&GatewayConfig, Url), ConfigError> {
        let gateway = self.gateway.as_ref().ok_or(ConfigError::Missing {
            key: "gateway.base_url",
            env: "FARMSYNC__GATEWAY__BASE_URL",
        })?;
        let url = gateway.validate()?;
        Ok((gateway, url))
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            match args.verbose {
                0 => {}
                1 => default_section.console_level = "debug".to_string(),
                _ => default_section.console_level = "trace".to_string(),
            }
        }
    }
}

/// Command line arguments relevant to configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
    pub mock: bool,
}
