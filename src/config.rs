//! Configuration loaded from the environment

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_MAX_CONTENT_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
#[error("invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_content_bytes: usize,
    pub stream_chunk_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_path: PathBuf::from("jsonshare.db"),
            upload_dir: PathBuf::from("uploads"),
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            stream_chunk_bytes: DEFAULT_STREAM_CHUNK_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            host: lookup("JSONSHARE_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "JSONSHARE_PORT", defaults.port)?,
            database_path: lookup("JSONSHARE_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            upload_dir: lookup("JSONSHARE_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_content_bytes: parse_or(
                &lookup,
                "JSONSHARE_MAX_CONTENT_BYTES",
                defaults.max_content_bytes,
            )?,
            stream_chunk_bytes: parse_or(
                &lookup,
                "JSONSHARE_STREAM_CHUNK_BYTES",
                defaults.stream_chunk_bytes,
            )?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
        None => Ok(default),
    }
}
