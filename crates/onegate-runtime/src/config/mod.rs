//! Configuration for the onegate runtime.
//!
//! Figment-based loading (files, environment, programmatic overrides),
//! explicit snapshot saving, and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    ConfigLoader, Profile, load_config, load_config_from_file, render_config, save_config,
};
pub use schema::{
    AccountConfig, GatewayConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    ServerConfig, SpanEventConfig, merge_json,
};
pub use validation::validate_config;
