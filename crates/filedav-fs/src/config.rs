//! Server configuration.
//!
//! ```toml
//! root = "/srv/files"
//! bind = "0.0.0.0"
//! port = 4918
//! read_only = false
//! quota_bytes = 10737418240
//! forbidden_chars = "\\/:*?\"<>|"
//! view_root = "/"
//! hook_root = "/"
//! ```

use filedav_core::{PathRules, UploadConfig, View, DEFAULT_FORBIDDEN_CHARS, DEFAULT_UPLOADS_DIR};
use serde::Deserialize;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 4918;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Directory served and written to.
    pub root: PathBuf,
    pub bind: IpAddr,
    pub port: u16,
    pub read_only: bool,
    pub quota_bytes: Option<u64>,
    pub forbidden_chars: String,
    /// Storage directory clients see as `/`.
    pub view_root: String,
    /// Storage directory hook paths are reported relative to.
    pub hook_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            read_only: false,
            quota_bytes: None,
            forbidden_chars: DEFAULT_FORBIDDEN_CHARS.to_string(),
            view_root: "/".to_string(),
            hook_root: "/".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Settings for the upload pipeline.
    pub fn upload_config(&self) -> Result<UploadConfig, ConfigError> {
        let view = View::new(&self.view_root).map_err(|err| ConfigError::Invalid {
            field: "view_root",
            message: err.to_string(),
        })?;
        let hook_view = View::new(&self.hook_root).map_err(|err| ConfigError::Invalid {
            field: "hook_root",
            message: err.to_string(),
        })?;
        Ok(UploadConfig {
            view,
            hook_view,
            uploads_dir: DEFAULT_UPLOADS_DIR.to_string(),
            rules: PathRules {
                forbidden_chars: self.forbidden_chars.clone(),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::Invalid {
                field: "root",
                message: format!("{} is not a directory", self.root.display()),
            });
        }
        self.upload_config().map(|_| ())
    }
}
