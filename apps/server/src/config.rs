//! Server configuration
//!
//! Values are layered, later sources winning:
//! 1. Built-in defaults
//! 2. `tally.{toml,yaml,json}` in the working directory (optional)
//! 3. An explicit file passed to [`Config::load_from`]
//! 4. `TALLY__*` environment variables (`TALLY__SERVER__PORT=8080`)
//!
//! A `.env` file is loaded into the environment first if present.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

const ENV_PREFIX: &str = "TALLY";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const FILE_ROTATIONS: &[&str] = &["daily", "hourly", "minutely", "never"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub wiring: WiringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty disables CORS headers.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WiringConfig {
    pub style: WiringStyle,
}

/// How the visit handler obtains its dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WiringStyle {
    /// Typed dependencies resolved from the request scope before the handler runs.
    #[default]
    Constructor,
    /// The handler receives a locator and resolves dependencies itself.
    Locator,
    /// The handler builds its object graph by hand from application state.
    Manual,
}

impl WiringStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            WiringStyle::Constructor => "constructor",
            WiringStyle::Locator => "locator",
            WiringStyle::Manual => "manual",
        }
    }
}

impl fmt::Display for WiringStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WiringStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "constructor" => Ok(WiringStyle::Constructor),
            "locator" => Ok(WiringStyle::Locator),
            "manual" => Ok(WiringStyle::Manual),
            other => Err(format!(
                "unknown wiring style '{other}' (expected constructor, locator or manual)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// daily, hourly, minutely or never
    pub file_rotation: String,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "tally".to_string(),
            file_rotation: "daily".to_string(),
            service_name: "tally".to_string(),
        }
    }
}

impl Config {
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("tally").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.host.trim().is_empty() {
            return Err("server.host must not be empty".to_string());
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if !FILE_ROTATIONS.contains(&self.logging.file_rotation.as_str()) {
            return Err(format!(
                "logging.file_rotation '{}' is not one of {}",
                self.logging.file_rotation,
                FILE_ROTATIONS.join(", ")
            ));
        }

        if self.logging.file_enabled && self.logging.file_prefix.trim().is_empty() {
            return Err("logging.file_prefix must be set when file logging is enabled".to_string());
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .with_context(|| format!("Invalid listen address '{addr}'"))
    }
}
