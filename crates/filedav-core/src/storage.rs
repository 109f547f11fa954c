//! Storage collaborator interface.
//!
//! Paths are canonical, `/`-separated and absolute within the storage (see
//! [`View`](crate::View)). Every method may fail with any [`StorageError`].

use crate::error::StorageError;
use std::io::{Read, Write};

pub type StorageResult<T> = Result<T, StorageError>;

/// Write handle returned by [`Storage::open_write`].
///
/// Failures the backend only detects at the end (quota accounting, content
/// scanning, fsync) surface from [`close`](StorageWriter::close).
pub trait StorageWriter: Write + Send {
    fn close(self: Box<Self>) -> StorageResult<()>;
}

/// Metadata recorded after a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfoUpdate {
    /// Server time of the upload, unix seconds.
    pub upload_time: Option<i64>,
    /// Client-supplied creation time, unix seconds.
    pub creation_time: Option<i64>,
    /// `Some("")` clears a stored checksum.
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub upload_time: Option<i64>,
    pub creation_time: Option<i64>,
    pub checksum: Option<String>,
}

impl FileInfo {
    /// Merges `update`; an empty checksum clears the stored one.
    pub fn apply(&mut self, update: &FileInfoUpdate) {
        if let Some(upload_time) = update.upload_time {
            self.upload_time = Some(upload_time);
        }
        if let Some(creation_time) = update.creation_time {
            self.creation_time = Some(creation_time);
        }
        match update.checksum.as_deref() {
            Some("") => self.checksum = None,
            Some(checksum) => self.checksum = Some(checksum.to_string()),
            None => {}
        }
    }
}

pub trait Storage: Send + Sync {
    fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Opens `path` for writing, creating or truncating it.
    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriter>>;

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn Read + Send>>;

    /// Atomically replaces `to` with `from`.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    fn unlink(&self, path: &str) -> StorageResult<()>;

    fn size(&self, path: &str) -> StorageResult<u64>;

    /// Modification time, unix seconds.
    fn mtime(&self, path: &str) -> StorageResult<i64>;

    /// Opaque token that changes whenever the content changes.
    fn etag(&self, path: &str) -> StorageResult<String>;

    /// Sets the modification time. `Ok(false)` if the backend cannot.
    fn touch(&self, path: &str, mtime: i64) -> StorageResult<bool>;

    /// Bytes still available under `dir`, `None` when unlimited.
    fn free_space(&self, _dir: &str) -> StorageResult<Option<u64>> {
        Ok(None)
    }

    /// Backend-specific file name rules.
    fn verify_name(&self, _name: &str) -> StorageResult<()> {
        Ok(())
    }

    /// Backend-specific rules for the directories along a canonical path.
    fn verify_path(&self, _path: &str) -> StorageResult<()> {
        Ok(())
    }

    fn file_info(&self, _path: &str) -> StorageResult<FileInfo> {
        Ok(FileInfo::default())
    }

    fn put_file_info(&self, _path: &str, _update: &FileInfoUpdate) -> StorageResult<()> {
        Ok(())
    }
}
