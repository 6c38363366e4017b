use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::StartupError;

/// Upload ceiling for captured plate images.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STORE_QUEUE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl FromStr for DatabaseLocation {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            ":memory:" => DatabaseLocation::Memory,
            path => DatabaseLocation::File(PathBuf::from(path)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: SocketAddr,
    pub database: DatabaseLocation,
    /// Plate recognition service; image submissions are refused without it.
    pub ocr_endpoint: Option<String>,
    pub max_upload_bytes: usize,
    /// Depth of the store command queue.
    pub store_queue: usize,
    /// Reference data applied at startup.
    pub seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            database: DatabaseLocation::Memory,
            ocr_endpoint: None,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            store_queue: DEFAULT_STORE_QUEUE,
            seed: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.max_upload_bytes == 0 {
            return Err(StartupError::Config(String::from(
                "max_upload_bytes cannot be 0",
            )));
        }
        if self.max_upload_bytes > MAX_UPLOAD_BYTES {
            return Err(StartupError::Config(format!(
                "max_upload_bytes cannot exceed {MAX_UPLOAD_BYTES}"
            )));
        }
        if self.store_queue == 0 {
            return Err(StartupError::Config(String::from(
                "store_queue cannot be 0",
            )));
        }
        if let Some(endpoint) = &self.ocr_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(StartupError::Config(format!(
                    "ocr endpoint '{endpoint}' is not an http(s) url"
                )));
            }
        }
        Ok(())
    }
}
