//! filedav-serve: serve a directory over WebDAV.
//!
//! # Usage
//!
//! ```bash
//! # Serve ./files on the default port
//! filedav-serve --root ./files
//!
//! # Use a config file, overriding the port
//! filedav-serve --config filedav.toml --port 8080
//! ```

use clap::Parser;
use env_logger::Env;
use filedav_fs::webdav::{self, FileDav};
use filedav_fs::ServerConfig;
use log::{error, info};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

/// Serve a directory over WebDAV.
#[derive(Parser, Debug)]
#[command(name = "filedav-serve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; command-line flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory to serve
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Port to listen on (default: 4918)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (default: 127.0.0.1)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Refuse all writes
    #[arg(long)]
    read_only: bool,

    /// Storage quota in bytes
    #[arg(short, long, value_name = "BYTES")]
    quota: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, filedav_fs::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if self.read_only {
            config.read_only = true;
        }
        if self.quota.is_some() {
            config.quota_bytes = self.quota;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    info!("Serving {}", config.root.display());
    if config.read_only {
        info!("Read-only mode");
    }
    if let Some(quota) = config.quota_bytes {
        info!("Quota: {} bytes", quota);
    }

    let app = match FileDav::from_config(&config) {
        Ok(app) => app,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = webdav::serve(app, config.addr()).await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
