use super::meta::{remove_if_exists, ContentHash, FileMeta};
use chrono::{DateTime, Utc};
use filedav_core::{
    is_part_file_name, FileInfo, FileInfoUpdate, Storage, StorageError, StorageResult,
    StorageWriter,
};
use log::{debug, trace, warn};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Directory under the base directory holding server state.
pub const STATE_DIR: &str = ".filedav";
const META_DIR: &str = "meta";
const MAX_NAME_BYTES: usize = 255;

/// [`Storage`] over a directory on the local disk.
///
/// Storage paths map below `base_dir`. Metadata lives in TOML sidecars under
/// `<base_dir>/.filedav/meta`, so the served tree holds only user files.
///
/// With a quota set, the bytes in use are measured once and then kept as a
/// running total shared by every clone. Writers reserve against that total,
/// so concurrent uploads cannot overrun the quota together.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
    quota: Option<u64>,
    usage: Arc<Mutex<Option<u64>>>,
}

impl LocalStorage {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            quota: None,
            usage: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Local path of the storage path `path`.
    pub fn local_path(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = normalize_relative_path(path)?;
        Ok(self.base_dir.join(rel))
    }

    fn meta_path(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = normalize_relative_path(path)?;
        if rel.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let mut meta = self.base_dir.join(STATE_DIR).join(META_DIR).join(rel);
        let file_name = meta
            .file_name()
            .map(|name| format!("{}.toml", name.to_string_lossy()))
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        meta.set_file_name(file_name);
        Ok(meta)
    }

    fn load_meta(&self, path: &str) -> StorageResult<FileMeta> {
        Ok(FileMeta::load(&self.meta_path(path)?)?)
    }

    fn store_meta(&self, path: &str, meta: &FileMeta) -> StorageResult<()> {
        Ok(meta.store(&self.meta_path(path)?)?)
    }

    /// Moves metadata along with a file renamed outside the upload path.
    pub fn rename_meta(&self, from: &str, to: &str) -> StorageResult<()> {
        let meta = self.load_meta(from)?;
        remove_if_exists(&self.meta_path(from)?)?;
        self.store_meta(to, &meta)
    }

    pub fn remove_meta(&self, path: &str) -> StorageResult<()> {
        Ok(remove_if_exists(&self.meta_path(path)?)?)
    }

    /// Bytes used below the base directory, metadata sidecars excluded.
    pub fn used_bytes(&self) -> StorageResult<u64> {
        let mut usage = self.usage();
        self.measured(&mut usage)
    }

    /// Drops the running total after the tree changed behind this storage's
    /// back; the next quota check walks the tree again.
    pub fn forget_usage(&self) {
        *self.usage() = None;
    }

    fn usage(&self) -> MutexGuard<'_, Option<u64>> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn measured(&self, usage: &mut Option<u64>) -> StorageResult<u64> {
        if let Some(used) = *usage {
            return Ok(used);
        }
        let used = if self.base_dir.exists() {
            dir_size(&self.base_dir, &self.base_dir.join(STATE_DIR).join(META_DIR))?
        } else {
            0
        };
        trace!("measured {} bytes below {}", used, self.base_dir.display());
        if self.quota.is_some() {
            *usage = Some(used);
        }
        Ok(used)
    }

    /// Claims `bytes` of the quota for a write to `local`. Returns `false`
    /// when no quota is enforced.
    fn reserve(&self, local: &Path, bytes: u64) -> StorageResult<bool> {
        let Some(quota) = self.quota else {
            return Ok(false);
        };
        let mut usage = self.usage();
        let used = self.measured(&mut usage)?;
        if used.saturating_add(bytes) > quota {
            return Err(StorageError::EntityTooLarge(format!(
                "writing {} exceeds the storage quota",
                local.display()
            )));
        }
        *usage = Some(used + bytes);
        Ok(true)
    }

    fn release(&self, bytes: u64) {
        if let Some(used) = self.usage().as_mut() {
            *used = used.saturating_sub(bytes);
        }
    }

    fn content_hash(&self, path: &str, local: &Path) -> StorageResult<ContentHash> {
        let metadata = fs::metadata(local)?;
        let mtime_ns = mtime_nanos(&metadata)?;
        let mut meta = self.load_meta(path)?;
        if let Some(content) = &meta.content {
            if content.size == metadata.len() && content.mtime_ns == mtime_ns {
                return Ok(content.clone());
            }
        }

        let mut hasher = blake3::Hasher::new();
        let mut file = File::open(local)?;
        io::copy(&mut file, &mut hasher)?;
        let content = ContentHash {
            hash: hasher.finalize().to_hex().to_string(),
            size: metadata.len(),
            mtime_ns,
        };
        trace!("hashed {} ({} bytes)", path, content.size);
        meta.content = Some(content.clone());
        if let Err(err) = self.store_meta(path, &meta) {
            warn!("could not cache content hash of {}: {}", path, err);
        }
        Ok(content)
    }
}

struct LocalWriter {
    file: File,
    path: PathBuf,
    storage: LocalStorage,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        let reserved = self
            .storage
            .reserve(&self.path, len)
            .map_err(StorageError::into_io)?;
        let result = self.file.write(buf);
        if reserved {
            let written = result.as_ref().map_or(0, |n| *n as u64);
            self.storage.release(len - written);
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn close(self: Box<Self>) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn exists(&self, path: &str) -> StorageResult<bool> {
        match fs::symlink_metadata(self.local_path(path)?) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriter>> {
        let local = self.local_path(path)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        let truncated = file_len(&local)?;
        let file = File::create(&local)?;
        self.release(truncated);
        Ok(Box::new(LocalWriter {
            file,
            path: local,
            storage: self.clone(),
        }))
    }

    fn open_read(&self, path: &str) -> StorageResult<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.local_path(path)?)?))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let target = self.local_path(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let source = self.local_path(from)?;
        let replaced = if source == target { 0 } else { file_len(&target)? };
        fs::rename(&source, &target)?;
        self.release(replaced);

        // The cached hash describes the replaced content. The file is already
        // in place, so metadata trouble must not fail the rename.
        match self.load_meta(to) {
            Ok(mut meta) => {
                if meta.content.take().is_some() {
                    if let Err(err) = self.store_meta(to, &meta) {
                        warn!("could not drop stale content hash of {}: {}", to, err);
                    }
                }
            }
            Err(err) => {
                warn!("discarding unreadable metadata of {}: {}", to, err);
                if let Err(err) = self.remove_meta(to) {
                    warn!("could not remove metadata of {}: {}", to, err);
                }
            }
        }
        debug!("renamed {} to {}", from, to);
        Ok(())
    }

    fn unlink(&self, path: &str) -> StorageResult<()> {
        let local = self.local_path(path)?;
        let freed = file_len(&local)?;
        remove_if_exists(&local)?;
        self.release(freed);
        if !is_state_path(path) {
            self.remove_meta(path)?;
        }
        Ok(())
    }

    fn size(&self, path: &str) -> StorageResult<u64> {
        Ok(fs::metadata(self.local_path(path)?)?.len())
    }

    fn mtime(&self, path: &str) -> StorageResult<i64> {
        let modified = fs::metadata(self.local_path(path)?)?.modified()?;
        Ok(DateTime::<Utc>::from(modified).timestamp())
    }

    fn etag(&self, path: &str) -> StorageResult<String> {
        let local = self.local_path(path)?;
        let content = self.content_hash(path, &local)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(content.hash.as_bytes());
        hasher.update(&content.mtime_ns.to_le_bytes());
        let digest = hasher.finalize();
        Ok(hex::encode(&digest.as_bytes()[..16]))
    }

    fn touch(&self, path: &str, mtime: i64) -> StorageResult<bool> {
        let Ok(secs) = u64::try_from(mtime) else {
            return Ok(false);
        };
        let file = File::options().write(true).open(self.local_path(path)?)?;
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))?;
        Ok(true)
    }

    fn free_space(&self, _dir: &str) -> StorageResult<Option<u64>> {
        match self.quota {
            Some(quota) => Ok(Some(quota.saturating_sub(self.used_bytes()?))),
            None => Ok(None),
        }
    }

    fn verify_name(&self, name: &str) -> StorageResult<()> {
        if name == STATE_DIR || is_part_file_name(name) {
            return Err(StorageError::InvalidPath(format!(
                "{:?} is reserved by the server",
                name
            )));
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(StorageError::InvalidPath(format!(
                "file name longer than {} bytes",
                MAX_NAME_BYTES
            )));
        }
        Ok(())
    }

    fn verify_path(&self, path: &str) -> StorageResult<()> {
        if path.split('/').any(|segment| segment == STATE_DIR) {
            return Err(StorageError::InvalidPath(format!(
                "{} lies inside the server state directory",
                path
            )));
        }
        Ok(())
    }

    fn file_info(&self, path: &str) -> StorageResult<FileInfo> {
        Ok(self.load_meta(path)?.info())
    }

    fn put_file_info(&self, path: &str, update: &FileInfoUpdate) -> StorageResult<()> {
        let mut meta = self.load_meta(path)?;
        meta.apply(update);
        self.store_meta(path, &meta)
    }
}

/// Whether `path` lies inside the server state directory.
pub fn is_state_path(path: &str) -> bool {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .is_some_and(|first| first == STATE_DIR)
}

fn normalize_relative_path(path: &str) -> StorageResult<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let rel = Path::new(trimmed);
    for component in rel.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
            _ => {}
        }
    }
    Ok(rel.to_path_buf())
}

fn mtime_nanos(metadata: &fs::Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(DateTime::<Utc>::from(modified)
        .timestamp_nanos_opt()
        .unwrap_or_else(|| DateTime::<Utc>::from(modified).timestamp()))
}

/// Length of the regular file at `local`, 0 when there is none.
fn file_len(local: &Path) -> io::Result<u64> {
    match fs::symlink_metadata(local) {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Ok(0),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err),
    }
}

fn dir_size(dir: &Path, skip: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            let path = entry.path();
            if path != skip {
                total += dir_size(&path, skip)?;
            }
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Seconds since the epoch as a `SystemTime`, for metadata reporting.
pub fn system_time(secs: i64) -> SystemTime {
    u64::try_from(secs)
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_stay_below_base_dir() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert_eq!(storage.local_path("/a/b.txt").unwrap(), dir.path().join("a/b.txt"));
        assert!(storage.local_path("/../etc/passwd").is_err());
        assert!(is_state_path("/.filedav/uploads/x"));
        assert!(!is_state_path("/docs/.filedav-notes"));
    }

    #[test]
    fn etag_follows_content_and_mtime() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        fs::write(dir.path().join("a.txt"), b"one").unwrap();
        storage.touch("/a.txt", 1_000_000).unwrap();
        let first = storage.etag("/a.txt").unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, storage.etag("/a.txt").unwrap());

        storage.touch("/a.txt", 2_000_000).unwrap();
        assert_ne!(first, storage.etag("/a.txt").unwrap());
        assert_eq!(storage.mtime("/a.txt").unwrap(), 2_000_000);
    }

    #[test]
    fn writer_enforces_quota() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).with_quota(Some(4));
        let mut writer = storage.open_write("/big.bin").unwrap();
        let err = writer.write_all(b"0123456789").unwrap_err();
        assert!(matches!(
            StorageError::from(err),
            StorageError::EntityTooLarge(_)
        ));
    }

    #[test]
    fn concurrent_writers_share_the_quota() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).with_quota(Some(10));
        let mut first = storage.open_write("/a.bin").unwrap();
        let mut second = storage.clone().open_write("/b.bin").unwrap();

        first.write_all(b"012345").unwrap();
        let err = second.write_all(b"012345").unwrap_err();
        assert!(matches!(
            StorageError::from(err),
            StorageError::EntityTooLarge(_)
        ));
        assert_eq!(storage.used_bytes().unwrap(), 6);

        first.close().unwrap();
        storage.unlink("/a.bin").unwrap();
        assert_eq!(storage.free_space("/").unwrap(), Some(10));
        second.write_all(b"012345").unwrap();
        second.close().unwrap();
        assert_eq!(storage.used_bytes().unwrap(), 6);
    }

    #[test]
    fn usage_skips_sidecars_and_follows_renames() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.txt"), b"0123456789").unwrap();
        let storage = LocalStorage::new(dir.path()).with_quota(Some(100));
        storage
            .put_file_info(
                "/old.txt",
                &FileInfoUpdate {
                    checksum: Some("SHA1:abc".to_string()),
                    ..FileInfoUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(storage.used_bytes().unwrap(), 10);

        let mut writer = storage.open_write("/new.part").unwrap();
        writer.write_all(b"abc").unwrap();
        writer.close().unwrap();
        assert_eq!(storage.used_bytes().unwrap(), 13);

        storage.rename("/new.part", "/old.txt").unwrap();
        assert_eq!(storage.used_bytes().unwrap(), 3);

        fs::write(dir.path().join("outside.txt"), b"12345").unwrap();
        storage.forget_usage();
        assert_eq!(storage.used_bytes().unwrap(), 8);
    }

    #[test]
    fn rename_survives_unreadable_sidecar() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let sidecar = dir.path().join(".filedav/meta/a.txt.toml");
        fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        fs::write(&sidecar, b"not [valid toml").unwrap();
        fs::write(dir.path().join(".a.txt.ocTransferId1.part"), b"new").unwrap();

        storage.rename("/.a.txt.ocTransferId1.part", "/a.txt").unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"new");
        assert!(!sidecar.exists());
        assert_eq!(storage.file_info("/a.txt").unwrap(), FileInfo::default());
    }

    #[test]
    fn state_directory_paths_are_rejected() {
        let storage = LocalStorage::new("/nonexistent");
        assert!(storage.verify_path("/.filedav/meta/a.txt.toml").is_err());
        assert!(storage.verify_path("/docs/.filedav/x").is_err());
        assert!(storage.verify_path("/docs/.filedav-notes/x").is_ok());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let storage = LocalStorage::new("/nonexistent");
        assert!(storage.verify_name(".filedav").is_err());
        assert!(storage.verify_name(".a.txt.ocTransferId1.part").is_err());
        assert!(storage.verify_name(&"x".repeat(300)).is_err());
        assert!(storage.verify_name("a.txt").is_ok());
    }
}
