//! # filedav-fs
//!
//! Serves a local directory over WebDAV, with uploads going through the
//! `filedav-core` PUT pipeline.
//!
//! This crate provides:
//! - A disk-backed [`Storage`](filedav_core::Storage) ([`LocalStorage`])
//!   with TOML metadata sidecars and an optional quota
//! - Server configuration ([`ServerConfig`])
//! - A log-backed notification sink ([`LogSink`])
//! - **The WebDAV server** (with the default `webdav` feature)
//!
//! ## Example
//!
//! ```ignore
//! use filedav_core::{MemoryLockProvider, UploadHandler, UploadRequest};
//! use filedav_fs::LocalStorage;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(LocalStorage::new("/srv/files"));
//! let handler = UploadHandler::new(storage, Arc::new(MemoryLockProvider::new()));
//! handler.put(UploadRequest::new("/hello.txt", &b"hi"[..]).content_length(2))?;
//! ```

pub mod config;
pub mod hooks;
pub mod store;

#[cfg(feature = "webdav")]
pub mod webdav;

pub use config::{ConfigError, ServerConfig};
pub use hooks::LogSink;
pub use store::LocalStorage;
