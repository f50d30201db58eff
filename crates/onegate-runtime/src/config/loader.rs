//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML files (`onegate.toml`, `config.toml`)
//! - `yaml-config`: YAML files (`onegate.yaml`, `onegate.yml`, ...)
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic `merge` calls
//! 3. Profile-specific config file (`onegate.{profile}.toml`)
//! 4. Main config file (`onegate.toml` / `onegate.yaml`)
//! 5. Environment variables (`ONEGATE_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `ONEGATE_` prefix with `__` as separator:
//!
//! - `ONEGATE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ONEGATE_SERVER__PORT=6700` → `server.port = 6700`
//!
//! # Saving
//!
//! Configuration values are plain snapshots. Nothing is written back
//! implicitly; [`save_config`] writes a snapshot when asked to.
//!
//! ```rust,ignore
//! use onegate_runtime::config::{ConfigLoader, save_config};
//!
//! let mut config = ConfigLoader::new().file("onegate.toml").load()?;
//! config.server.port = 6700;
//! save_config(&config, "onegate.toml")?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::GatewayConfig;
use super::validation::validate_config;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ONEGATE_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            _ => Self::Custom(name.to_string()),
        }
    }

    /// Reads `ONEGATE_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var("ONEGATE_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
    validate: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
            validate: true,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds `<user config dir>/onegate` to search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("onegate")),
            None => self,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Skips [`validate_config`] after loading.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: GatewayConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<GatewayConfig> {
        let profile = self.profile.clone();
        let validate = self.validate;
        let figment = self.build_figment()?;

        let config: GatewayConfig = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(format!("Failed to extract configuration: {e}")))?;

        if validate {
            validate_config(&config)?;
        }

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            accounts = config.accounts.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = self.config_file.clone() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        match extension(path) {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            "json" => Ok(figment.merge(figment::providers::Json::file(path))),
            ext => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("onegate"));
        }
        paths
    }

    /// Tries a profile-specific variant, then the base file, for every
    /// `search_path × base_name`. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_mut, unused_variables)
    )]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["onegate.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["onegate.yaml", "onegate.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().with_current_dir().with_user_config_dir().load()
}

/// Loads configuration from a specific file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().file(path).load()
}

/// Serializes a snapshot in the format matching the file extension.
pub fn render_config(config: &GatewayConfig, format: &str) -> ConfigResult<String> {
    let serialize_error = |e: &dyn std::fmt::Display| ConfigError::SerializeError(e.to_string());
    match format {
        #[cfg(feature = "toml-config")]
        "toml" => toml::to_string_pretty(config).map_err(|e| serialize_error(&e)),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => serde_yaml::to_string(config).map_err(|e| serialize_error(&e)),
        "json" => serde_json::to_string_pretty(config).map_err(|e| serialize_error(&e)),
        other => Err(ConfigError::SerializeError(format!(
            "Unsupported or disabled configuration file format: .{other}"
        ))),
    }
}

/// Writes a snapshot to `path`, creating parent directories.
pub fn save_config<P: AsRef<Path>>(config: &GatewayConfig, path: P) -> ConfigResult<()> {
    let path = path.as_ref();
    let rendered = render_config(config, extension(path))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, rendered)?;
    info!(path = %path.display(), "Configuration saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("onegate-config-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::new()
            .search_path(scratch_dir("empty"))
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.logging.level.as_str(), "info");
        assert_eq!(config.server.port, 5700);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/onegate.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_load_toml_file() {
        let dir = scratch_dir("toml");
        let path = dir.join("onegate.toml");
        std::fs::write(
            &path,
            r#"
[logging]
level = "debug"

[general."onebot.v11"]
heartbeat_interval = 1000

[[accounts]]
platform = "qq"
account_id = 10001

[accounts.protocols."onebot.v11"]
access_token = "t"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new().file(&path).without_env().load().unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.accounts[0].account_id, "10001");

        let instances = config.instance_configs("qq", "10001").unwrap();
        assert_eq!(instances["onebot.v11"].heartbeat_interval, 1000);
        assert_eq!(instances["onebot.v11"].token(), Some("t"));
    }

    #[test]
    fn test_save_then_load_json() {
        let dir = scratch_dir("save");
        let path = dir.join("nested").join("onegate.json");

        let mut config = GatewayConfig::default();
        config.server.port = 6700;
        config.logging.level = LogLevel::Warn;
        save_config(&config, &path).unwrap();

        let loaded = ConfigLoader::new().file(&path).without_env().load().unwrap();
        assert_eq!(loaded.server.port, 6700);
        assert_eq!(loaded.logging.level, LogLevel::Warn);
    }

    #[cfg(feature = "yaml-config")]
    #[test]
    fn test_yaml_profile_file_is_layered() {
        let dir = scratch_dir("yaml");
        std::fs::write(dir.join("onegate.yaml"), "server:\n  port: 6000\n").unwrap();
        std::fs::write(
            dir.join("onegate.staging.yaml"),
            "server:\n  host: 0.0.0.0\n  port: 7000\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .search_path(&dir)
            .profile("staging")
            .without_env()
            .load()
            .unwrap();
        // The base file is merged last and wins on conflicts.
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_profile_parse() {
        assert!(matches!(Profile::parse("prod"), Profile::Production));
        assert!(matches!(Profile::parse("DEV"), Profile::Development));
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }
}
