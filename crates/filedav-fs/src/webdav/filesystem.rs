//! Read-side WebDAV filesystem over a [`LocalStorage`] directory.
//!
//! Uploads never reach this filesystem: `PUT` is routed to the upload
//! pipeline by the server. Everything else (GET, PROPFIND, MKCOL, DELETE,
//! MOVE, COPY) is served here. Server state and part files are hidden.

use crate::store::{LocalStorage, STATE_DIR};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use filedav_core::{
    is_part_file_name, LockError, LockProvider, PathLock, Storage, StorageError, View,
};
use futures::stream;
use log::{debug, trace, warn};
use std::fs::{self, File};
use std::io::{self, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Clone)]
pub struct LocalDavFs {
    inner: Arc<LocalDavFsInner>,
}

struct LocalDavFsInner {
    storage: Arc<LocalStorage>,
    locks: Arc<dyn LockProvider>,
    view: View,
    read_only: bool,
}

impl LocalDavFs {
    pub fn new(
        storage: Arc<LocalStorage>,
        locks: Arc<dyn LockProvider>,
        view: View,
        read_only: bool,
    ) -> Self {
        Self {
            inner: Arc::new(LocalDavFsInner {
                storage,
                locks,
                view,
                read_only,
            }),
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.inner.storage
    }

    /// Storage path of a DAV path, rejecting hidden entries.
    fn storage_path(&self, path: &DavPath) -> Result<String, FsError> {
        let rel = path.as_rel_ospath().to_string_lossy().to_string();
        let abs = self
            .inner
            .view
            .absolute(&rel)
            .map_err(map_storage_error)?;
        if is_hidden(&abs) {
            return Err(FsError::NotFound);
        }
        Ok(abs)
    }

    fn local_path(&self, path: &str) -> Result<PathBuf, FsError> {
        self.inner.storage.local_path(path).map_err(map_storage_error)
    }

    fn check_writable(&self) -> Result<(), FsError> {
        if self.inner.read_only {
            return Err(FsError::Forbidden);
        }
        Ok(())
    }

    fn lock(&self, path: &str) -> Result<PathLock<'_>, FsError> {
        PathLock::exclusive(&*self.inner.locks, path).map_err(map_lock_error)
    }

    fn meta_for(&self, path: &str, metadata: &fs::Metadata) -> LocalMetaData {
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        let created = metadata.created().unwrap_or(modified);
        if metadata.is_dir() {
            return LocalMetaData::directory(created, modified);
        }
        let etag = match self.inner.storage.etag(path) {
            Ok(etag) => Some(etag),
            Err(err) => {
                warn!("no etag for {}: {}", path, err);
                None
            }
        };
        LocalMetaData::file(metadata.len(), created, modified, etag)
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/')
        .any(|segment| segment == STATE_DIR || is_part_file_name(segment))
}

impl DavFileSystem for LocalDavFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        trace!("open({:?}, {:?})", path, options);

        let result = (|| {
            if options.write
                || options.append
                || options.create
                || options.create_new
                || options.truncate
            {
                // PUT is served by the upload pipeline.
                return Err(FsError::Forbidden);
            }
            let storage_path = self.storage_path(path)?;
            let local = self.local_path(&storage_path)?;
            let file = File::open(&local).map_err(map_io_error)?;
            let metadata = file.metadata().map_err(map_io_error)?;
            if metadata.is_dir() {
                return Err(FsError::Forbidden);
            }
            let meta = self.meta_for(&storage_path, &metadata);
            Ok(Box::new(LocalDavFile {
                file,
                meta,
                position: 0,
            }) as Box<dyn DavFile>)
        })();

        Box::pin(async move { result })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        trace!("read_dir({:?})", path);

        let result = (|| {
            let storage_path = self.storage_path(path)?;
            let dir_path = self.local_path(&storage_path)?;
            let mut entries: Vec<Box<dyn DavDirEntry>> = Vec::new();
            for entry in fs::read_dir(&dir_path).map_err(map_io_error)? {
                let entry = entry.map_err(map_io_error)?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name == STATE_DIR || is_part_file_name(&name) {
                    continue;
                }
                let metadata = match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!("skipping {:?}: {}", entry.path(), err);
                        continue;
                    }
                };
                let child = filedav_core::view::join(&storage_path, &name);
                let meta = self.meta_for(&child, &metadata);
                entries.push(Box::new(LocalDirEntry { name, meta }));
            }
            debug!("read_dir: returning {} entries", entries.len());
            let stream = stream::iter(entries.into_iter().map(Ok));
            Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
        })();

        Box::pin(async move { result })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        trace!("metadata({:?})", path);

        let result = (|| {
            let storage_path = self.storage_path(path)?;
            let local = self.local_path(&storage_path)?;
            let metadata = fs::metadata(&local).map_err(map_io_error)?;
            Ok(Box::new(self.meta_for(&storage_path, &metadata)) as Box<dyn DavMetaData>)
        })();

        Box::pin(async move { result })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("create_dir({:?})", path);

        let result = (|| {
            self.check_writable()?;
            let storage_path = self.storage_path(path)?;
            fs::create_dir(self.local_path(&storage_path)?).map_err(map_io_error)
        })();

        Box::pin(async move { result })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_dir({:?})", path);

        let result = (|| {
            self.check_writable()?;
            let storage_path = self.storage_path(path)?;
            if storage_path == self.inner.view.root() {
                return Err(FsError::Forbidden);
            }
            fs::remove_dir(self.local_path(&storage_path)?).map_err(map_io_error)
        })();

        Box::pin(async move { result })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("remove_file({:?})", path);

        let result = (|| {
            self.check_writable()?;
            let storage_path = self.storage_path(path)?;
            let _lock = self.lock(&storage_path)?;
            fs::remove_file(self.local_path(&storage_path)?).map_err(map_io_error)?;
            self.inner.storage.forget_usage();
            self.inner
                .storage
                .remove_meta(&storage_path)
                .map_err(map_storage_error)
        })();

        Box::pin(async move { result })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("rename({:?}, {:?})", from, to);

        let result = (|| {
            self.check_writable()?;
            let from_path = self.storage_path(from)?;
            let to_path = self.storage_path(to)?;
            if from_path == self.inner.view.root() || to_path == self.inner.view.root() {
                return Err(FsError::Forbidden);
            }
            let _from_lock = self.lock(&from_path)?;
            let _to_lock = self.lock(&to_path)?;

            let from_local = self.local_path(&from_path)?;
            let is_file = fs::metadata(&from_local).map_err(map_io_error)?.is_file();
            fs::rename(&from_local, self.local_path(&to_path)?).map_err(map_io_error)?;
            self.inner.storage.forget_usage();
            if is_file {
                self.inner
                    .storage
                    .rename_meta(&from_path, &to_path)
                    .map_err(map_storage_error)?;
            }
            Ok(())
        })();

        Box::pin(async move { result })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        trace!("copy({:?}, {:?})", from, to);

        let result = (|| {
            self.check_writable()?;
            let from_path = self.storage_path(from)?;
            let to_path = self.storage_path(to)?;
            let _lock = self.lock(&to_path)?;
            fs::copy(self.local_path(&from_path)?, self.local_path(&to_path)?)
                .map_err(map_io_error)?;
            self.inner.storage.forget_usage();
            Ok(())
        })();

        Box::pin(async move { result })
    }
}

#[derive(Clone, Debug)]
struct LocalMetaData {
    is_dir: bool,
    len: u64,
    modified: SystemTime,
    created: SystemTime,
    etag: Option<String>,
}

impl LocalMetaData {
    fn directory(created: SystemTime, modified: SystemTime) -> Self {
        Self {
            is_dir: true,
            len: 0,
            modified,
            created,
            etag: None,
        }
    }

    fn file(len: u64, created: SystemTime, modified: SystemTime, etag: Option<String>) -> Self {
        Self {
            is_dir: false,
            len,
            modified,
            created,
            etag,
        }
    }
}

impl DavMetaData for LocalMetaData {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        Ok(self.created)
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }
}

struct LocalDirEntry {
    name: String,
    meta: LocalMetaData,
}

impl DavDirEntry for LocalDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

#[derive(Debug)]
struct LocalDavFile {
    file: File,
    meta: LocalMetaData,
    position: u64,
}

impl DavFile for LocalDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, bytes::Bytes> {
        let result = read_at_position(self, count);
        Box::pin(async move { result })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.meta.len as i64 + n,
            SeekFrom::Current(n) => self.position as i64 + n,
        };
        let result = if new_pos < 0 {
            Err(FsError::GeneralFailure)
        } else {
            self.position = new_pos as u64;
            Ok(self.position)
        };
        Box::pin(async move { result })
    }

    fn write_buf(&mut self, _buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: bytes::Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move { Err(FsError::Forbidden) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }
}

fn read_at_position(state: &mut LocalDavFile, count: usize) -> Result<bytes::Bytes, FsError> {
    let remaining = state.meta.len.saturating_sub(state.position);
    let to_read = std::cmp::min(count as u64, remaining) as usize;
    if to_read == 0 {
        return Ok(bytes::Bytes::new());
    }
    let mut buffer = vec![0u8; to_read];
    let n = state
        .file
        .read_at(&mut buffer, state.position)
        .map_err(map_io_error)?;
    state.position += n as u64;
    buffer.truncate(n);
    Ok(bytes::Bytes::from(buffer))
}

fn map_storage_error(err: StorageError) -> FsError {
    match err {
        StorageError::NotPermitted(_)
        | StorageError::InvalidPath(_)
        | StorageError::Forbidden { .. }
        | StorageError::Locked(_) => FsError::Forbidden,
        StorageError::EntityTooLarge(_) => FsError::InsufficientStorage,
        StorageError::Other(err) => match err.downcast::<io::Error>() {
            Ok(err) => map_io_error(*err),
            Err(_) => FsError::GeneralFailure,
        },
        _ => FsError::GeneralFailure,
    }
}

fn map_lock_error(err: LockError) -> FsError {
    debug!("{}", err);
    FsError::Forbidden
}

fn map_io_error(err: io::Error) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound,
        io::ErrorKind::PermissionDenied => FsError::Forbidden,
        io::ErrorKind::AlreadyExists => FsError::Exists,
        io::ErrorKind::StorageFull => FsError::InsufficientStorage,
        _ => FsError::GeneralFailure,
    }
}
