//! WebDAV front end for a [`LocalStorage`](crate::store::LocalStorage) directory.
//!
//! # Example
//!
//! ```ignore
//! use filedav_fs::config::ServerConfig;
//! use filedav_fs::webdav::{serve_background, FileDav};
//!
//! let config = ServerConfig { root: "/srv/files".into(), ..ServerConfig::default() };
//! let server = serve_background(FileDav::from_config(&config)?, config.addr()).await?;
//! println!("mount {}", server.mount_url());
//! ```

mod filesystem;
mod put;
mod server;

pub use filesystem::LocalDavFs;
pub use put::{error_body, handle_put, upload_headers, BodyReader};
pub use server::{serve, serve_background, FileDav, FileDavServer};
