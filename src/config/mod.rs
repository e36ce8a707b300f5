use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub dir: String,
    pub filename: String,
    /// When false the registry lives in memory only.
    pub persist: bool,
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

/// Reads `config.toml` if present, then `VEHICLES_`-prefixed environment
/// variables such as `VEHICLES_SERVER__PORT`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("VEHICLES")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    build(builder)
}

/// Parses a TOML document on top of the defaults.
pub fn load_config_from_str(toml: &str) -> Result<AppConfig, ConfigError> {
    build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
}

fn build(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig, ConfigError> {
    set_defaults(builder)?.build()?.try_deserialize()
}

pub fn set_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("server.address", "127.0.0.1")?
        .set_default("server.port", 6380)?
        .set_default("storage.dir", "data")?
        .set_default("storage.filename", "vehicles.json")?
        .set_default("storage.persist", true)?
        .set_default("log.format", "compact")
}
