#![allow(dead_code)]

use filedav_core::{
    FileInfo, FileInfoUpdate, LockError, LockMode, LockProvider, MemoryLockProvider,
    MemoryStorage, Storage, StorageError, StorageResult, StorageWriter,
};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// Storage call a [`FaultyStorage`] fails on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Write,
    Close,
    Rename,
    RenameSilently,
}

/// Wraps [`MemoryStorage`] and raises a chosen failure at one point.
/// Every unlink is recorded.
pub struct FaultyStorage {
    pub inner: MemoryStorage,
    fault: Mutex<Option<(FaultPoint, Box<dyn Fn() -> StorageError + Send + Sync>)>>,
    unlinked: Mutex<Vec<String>>,
}

impl FaultyStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            unlinked: Mutex::new(Vec::new()),
        }
    }

    pub fn unlinked(&self) -> Vec<String> {
        self.unlinked.lock().unwrap().clone()
    }

    pub fn fail_at(
        self,
        point: FaultPoint,
        make: impl Fn() -> StorageError + Send + Sync + 'static,
    ) -> Self {
        *self.fault.lock().unwrap() = Some((point, Box::new(make)));
        self
    }

    fn fault(&self, point: FaultPoint) -> Option<StorageError> {
        let fault = self.fault.lock().unwrap();
        match fault.as_ref() {
            Some((at, make)) if *at == point => Some(make()),
            _ => None,
        }
    }
}

struct FaultyWriter {
    inner: Box<dyn StorageWriter>,
    on_write: Option<StorageError>,
    on_close: Option<StorageError>,
}

impl Write for FaultyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = self.on_write.take() {
            return Err(err.into_io());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StorageWriter for FaultyWriter {
    fn close(self: Box<Self>) -> StorageResult<()> {
        let FaultyWriter {
            inner, on_close, ..
        } = *self;
        inner.close()?;
        match on_close {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Storage for FaultyStorage {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path)
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriter>> {
        Ok(Box::new(FaultyWriter {
            inner: self.inner.open_write(path)?,
            on_write: self.fault(FaultPoint::Write),
            on_close: self.fault(FaultPoint::Close),
        }))
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        self.inner.open_read(path)
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        if let Some(err) = self.fault(FaultPoint::Rename) {
            return Err(err);
        }
        if self.fault(FaultPoint::RenameSilently).is_some() {
            // Reports success without producing the target.
            return self.inner.unlink(from);
        }
        self.inner.rename(from, to)
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        self.unlinked.lock().unwrap().push(path.to_string());
        self.inner.unlink(path)
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        self.inner.size(path)
    }

    fn mtime(&self, path: &str) -> StorageResult<i64> {
        self.inner.mtime(path)
    }

    fn etag(&self, path: &str) -> StorageResult<String> {
        self.inner.etag(path)
    }

    fn touch(&self, path: &str, mtime: i64) -> StorageResult<bool> {
        self.inner.touch(path, mtime)
    }

    fn free_space(&self, dir: &str) -> StorageResult<Option<u64>> {
        self.inner.free_space(dir)
    }

    fn file_info(&self, path: &str) -> StorageResult<FileInfo> {
        self.inner.file_info(path)
    }

    fn put_file_info(&self, path: &str, update: &FileInfoUpdate) -> StorageResult<()> {
        self.inner.put_file_info(path, update)
    }
}

/// One call made to a [`RecordingLocks`] provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCall {
    Acquire(String, LockMode),
    Release(String, LockMode),
    Change(String, LockMode, LockMode),
}

/// Lock provider that records every call before delegating.
#[derive(Default)]
pub struct RecordingLocks {
    pub inner: MemoryLockProvider,
    calls: Mutex<Vec<LockCall>>,
}

impl RecordingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made for `path` only.
    pub fn calls_for(&self, path: &str) -> Vec<LockCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                LockCall::Acquire(p, _) | LockCall::Release(p, _) | LockCall::Change(p, _, _) => {
                    p == path
                }
            })
            .collect()
    }
}

impl LockProvider for RecordingLocks {
    fn acquire(&self, path: &str, mode: LockMode) -> Result<(), LockError> {
        self.calls
            .lock()
            .unwrap()
            .push(LockCall::Acquire(path.to_string(), mode));
        self.inner.acquire(path, mode)
    }

    fn release(&self, path: &str, mode: LockMode) -> Result<(), LockError> {
        self.calls
            .lock()
            .unwrap()
            .push(LockCall::Release(path.to_string(), mode));
        self.inner.release(path, mode)
    }

    fn change(&self, path: &str, from: LockMode, to: LockMode) -> Result<(), LockError> {
        self.calls
            .lock()
            .unwrap()
            .push(LockCall::Change(path.to_string(), from, to));
        self.inner.change(path, from, to)
    }
}

pub fn part_files(storage: &MemoryStorage) -> Vec<String> {
    storage
        .paths()
        .into_iter()
        .filter(|path| path.ends_with(".part"))
        .collect()
}

pub fn memory() -> (Arc<MemoryStorage>, Arc<MemoryLockProvider>) {
    (
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryLockProvider::new()),
    )
}
