// Gateway configuration file
// SPDX-License-Identifier: MPL-2.0
//
use serde::Deserialize;
use std::{fs, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("parse {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub routeb: RouteB,
    pub database: Database,
    #[serde(default)]
    pub logger: Logger,
}

/// Route B credentials issued by the utility.
#[derive(Debug, Deserialize)]
pub struct RouteB {
    pub id: String,
    pub password: String,
}

/// Time-series sink endpoint.
#[derive(Debug, Deserialize)]
pub struct Database {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Logger {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for Logger {
    fn default() -> Self {
        Logger { level: default_level() }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
    }
}

impl Logger {
    /// Map the configured name onto a tracing level. `critical` lands on
    /// ERROR (tracing has no critical rank); unknown names fall back to INFO.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" | "critical" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
