//! In-memory storage backend.

use crate::error::StorageError;
use crate::storage::{FileInfo, FileInfoUpdate, Storage, StorageResult, StorageWriter};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    mtime: i64,
    version: u64,
    info: FileInfo,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    next_version: u64,
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn used(&self) -> u64 {
        self.files.values().map(|file| file.data.len() as u64).sum()
    }

    fn file(&self, path: &str) -> StorageResult<&MemoryFile> {
        self.files.get(path).ok_or_else(|| not_found(path))
    }
}

/// Flat path → bytes map with an optional quota.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    quota: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) {
        let mut state = self.state();
        let version = state.bump();
        state.files.insert(
            path.to_string(),
            MemoryFile {
                data,
                mtime: Utc::now().timestamp(),
                version,
                info: FileInfo::default(),
            },
        );
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|file| file.data.clone())
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found(path: &str) -> StorageError {
    StorageError::from(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path),
    ))
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    path: String,
    quota: Option<u64>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(quota) = self.quota {
            if state.used() + buf.len() as u64 > quota {
                return Err(StorageError::EntityTooLarge(format!(
                    "quota of {} bytes exceeded",
                    quota
                ))
                .into_io());
            }
        }
        let version = state.bump();
        let file = state.files.get_mut(&self.path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} was removed", self.path))
        })?;
        file.data.extend_from_slice(buf);
        file.version = version;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageWriter for MemoryWriter {
    fn close(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.state().files.contains_key(path))
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriter>> {
        self.insert(path, Vec::new());
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            quota: self.quota,
        }))
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        let data = self.state().file(path)?.data.clone();
        Ok(Box::new(Cursor::new(data)))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut state = self.state();
        let mut file = state.files.remove(from).ok_or_else(|| not_found(from))?;
        file.version = state.bump();
        if let Some(previous) = state.files.get(to) {
            file.info = previous.info.clone();
        }
        state.files.insert(to.to_string(), file);
        Ok(())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        self.state().files.remove(path);
        Ok(())
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        Ok(self.state().file(path)?.data.len() as u64)
    }

    fn mtime(&self, path: &str) -> StorageResult<i64> {
        Ok(self.state().file(path)?.mtime)
    }

    fn etag(&self, path: &str) -> StorageResult<String> {
        Ok(format!("{:016x}", self.state().file(path)?.version))
    }

    fn touch(&self, path: &str, mtime: i64) -> StorageResult<bool> {
        let mut state = self.state();
        let version = state.bump();
        let file = state.files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.mtime = mtime;
        file.version = version;
        Ok(true)
    }

    fn free_space(&self, _dir: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .quota
            .map(|quota| quota.saturating_sub(self.state().used())))
    }

    fn file_info(&self, path: &str) -> StorageResult<FileInfo> {
        Ok(self.state().file(path)?.info.clone())
    }

    fn put_file_info(&self, path: &str, update: &FileInfoUpdate) -> StorageResult<()> {
        let mut state = self.state();
        let file = state.files.get_mut(path).ok_or_else(|| not_found(path))?;
        file.info.apply(update);
        Ok(())
    }
}
