//! Part files: upload bytes land here before they may replace the target.

use crate::error::StorageError;
use crate::storage::{Storage, StorageWriter};
use crate::view;
use log::{debug, warn};
use std::io::{self, Read};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Name of a fresh part file next to `target`.
pub fn part_path_for(target: &str) -> String {
    let (dir, name) = view::split(target);
    view::join(
        dir,
        &format!(".{}.ocTransferId{}.part", name, rand::random::<u32>()),
    )
}

pub fn is_part_file_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".part") && name.contains(".ocTransferId")
}

/// A fully written part file.
///
/// Dropping an uncommitted `StagedFile` unlinks the part file.
pub struct StagedFile<'a> {
    storage: &'a dyn Storage,
    path: String,
    len: u64,
    committed: bool,
}

impl std::fmt::Debug for StagedFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("committed", &self.committed)
            .finish()
    }
}

impl<'a> StagedFile<'a> {
    /// Streams `source` into a new part file beside `target`.
    pub fn write(
        storage: &'a dyn Storage,
        target: &str,
        source: &mut dyn Read,
    ) -> Result<Self, StorageError> {
        Self::write_to(storage, part_path_for(target), source)
    }

    /// Streams `source` into the part file `path`.
    pub fn write_to(
        storage: &'a dyn Storage,
        path: String,
        source: &mut dyn Read,
    ) -> Result<Self, StorageError> {
        let mut staged = StagedFile {
            storage,
            path,
            len: 0,
            committed: false,
        };
        let mut writer = storage.open_write(&staged.path)?;
        staged.len = copy_source(source, &mut *writer)?;
        writer.close()?;
        debug!("staged {} bytes in {}", staged.len, staged.path);
        Ok(staged)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bytes written to the part file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Renames the part file onto `target`.
    ///
    /// The part file is gone afterwards whatever the outcome.
    pub fn commit(mut self, target: &str) -> Result<(), StorageError> {
        self.storage.rename(&self.path, target)?;
        self.committed = true;
        if !self.storage.exists(target)? {
            return Err(StorageError::WriteFailed(format!(
                "could not rename part file {} to final file {}",
                self.path, target
            )));
        }
        Ok(())
    }

    pub fn discard(self) {}
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.storage.unlink(&self.path) {
            Ok(()) => debug!("removed part file {}", self.path),
            Err(err) => warn!("failed to remove part file {}: {}", self.path, err),
        }
    }
}

fn copy_source(source: &mut dyn Read, writer: &mut dyn StorageWriter) -> Result<u64, StorageError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_storage_failure(&err) => return Err(StorageError::from(err)),
            Err(err) => {
                return Err(StorageError::WriteFailed(format!(
                    "could not write file contents, reading the request body failed after {} bytes: {}",
                    written, err
                )))
            }
        };
        writer.write_all(&buffer[..n])?;
        written += n as u64;
    }
    writer.flush()?;
    Ok(written)
}

/// Read errors raised by a storage-backed source, such as stored chunks.
fn is_storage_failure(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<StorageError>())
}
