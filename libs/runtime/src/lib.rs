//! Process-level plumbing shared by FarmSync binaries: layered configuration
//! and logging bootstrap.

pub mod config;
mod home_dir;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, AppSection, AreaUnit, CliArgs, ConfigError, GatewayConfig,
    LoggingConfig, Section,
};
pub use home_dir::resolve_home_dir;
