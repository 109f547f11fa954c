//! # filedav-core
//!
//! The write path of a WebDAV file server, independent of any HTTP stack and
//! of any particular storage.
//!
//! This crate provides:
//! - The PUT state machine ([`UploadHandler`])
//! - Part-file staging with guaranteed cleanup ([`StagedFile`])
//! - Shared/exclusive path locks ([`PathLock`], [`MemoryLockProvider`])
//! - Legacy chunked uploads ([`ChunkName`], [`ChunkStore`])
//! - Client timestamp validation ([`parse_mtime`])
//! - The closed failure set of the storage collaborators ([`StorageError`])
//!   and its protocol translation ([`DavError`])
//! - An in-memory backend for tests and embedding ([`MemoryStorage`])
//!
//! ## Example
//!
//! ```ignore
//! use filedav_core::{MemoryLockProvider, MemoryStorage, UploadHandler, UploadRequest};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let handler = UploadHandler::new(storage.clone(), Arc::new(MemoryLockProvider::new()));
//!
//! let outcome = handler.put(
//!     UploadRequest::new("/notes.txt", &b"hello"[..])
//!         .content_length(5)
//!         .mtime("1700000000"),
//! )?;
//! println!("etag {}", outcome.etag().unwrap_or_default());
//! ```

mod chunking;
mod error;
mod lock;
mod memory;
mod mtime;
mod notify;
mod put;
mod request;
mod staging;
mod storage;
mod validate;
pub mod view;

pub use chunking::{AssembledChunks, ChunkName, ChunkSet, ChunkStore, UploadTarget};
pub use error::{BadRequestKind, DavError, ForbiddenKind, StorageError};
pub use lock::{LockError, LockMode, LockProvider, LockState, MemoryLockProvider, PathLock};
pub use memory::MemoryStorage;
pub use mtime::{parse_mtime, parse_timestamp};
pub use notify::{HookOutcome, NotificationSink, NullSink, RecordingSink, Signal};
pub use put::{CommitResult, PutOutcome, UploadConfig, UploadHandler, DEFAULT_UPLOADS_DIR};
pub use request::{Method, UploadHeaders, UploadRequest};
pub use staging::{is_part_file_name, part_path_for, StagedFile};
pub use storage::{FileInfo, FileInfoUpdate, Storage, StorageResult, StorageWriter};
pub use validate::{
    AccessPolicy, AllowAll, PathRules, ReadOnly, UploadValidator, DEFAULT_FORBIDDEN_CHARS,
};
pub use view::View;
