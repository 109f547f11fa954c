//! Legacy chunked uploads.
//!
//! A client splits a file into `total` chunks and PUTs each one to
//! `<name>-chunking-<transferId>-<total>-<index>` with an `OC-Chunked` header.
//! Chunks `0..total-1` are kept in the uploads directory; the last one is
//! streamed straight behind them into the staged write of `<name>`.

use crate::error::{BadRequestKind, DavError, StorageError};
use crate::staging::StagedFile;
use crate::storage::Storage;
use crate::view;
use log::{debug, warn};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::io::{self, Read};

const CHUNKING_MARKER: &str = "-chunking";

/// Decoded chunk file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    /// Directory of the target, view-relative.
    pub dir: String,
    /// File name of the assembled target.
    pub name: String,
    pub transfer_id: String,
    pub total: u32,
    pub index: u32,
}

impl ChunkName {
    /// Decodes `path`, whose last segment must follow the chunking convention.
    pub fn parse(path: &str) -> Result<Self, DavError> {
        let malformed = |reason: &str| {
            DavError::bad_request(
                BadRequestKind::MalformedChunk,
                format!("invalid chunk name {:?}: {}", path, reason),
            )
        };

        let (dir, file) = view::split(path);
        let mut parts = file.rsplitn(4, '-');
        let (Some(index), Some(total), Some(transfer_id), Some(rest)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected <name>-chunking-<transfer>-<total>-<index>"));
        };
        let name = rest
            .strip_suffix(CHUNKING_MARKER)
            .ok_or_else(|| malformed("missing chunking marker"))?;
        if name.is_empty() {
            return Err(malformed("empty file name"));
        }
        if !is_digits(transfer_id) || !is_digits(total) || !is_digits(index) {
            return Err(malformed("transfer id, total and index must be decimal"));
        }
        let total: u32 = total.parse().map_err(|_| malformed("chunk total out of range"))?;
        let index: u32 = index.parse().map_err(|_| malformed("chunk index out of range"))?;
        if total == 0 {
            return Err(malformed("a transfer needs at least one chunk"));
        }
        if index >= total {
            return Err(malformed("chunk index beyond the chunk total"));
        }

        Ok(Self {
            dir: dir.to_string(),
            name: name.to_string(),
            transfer_id: transfer_id.to_string(),
            total,
            index,
        })
    }

    /// View-relative path of the assembled file.
    pub fn target_path(&self) -> String {
        view::join(&self.dir, &self.name)
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    fn prefix(&self) -> String {
        format!("{}{}-{}-", self.name, CHUNKING_MARKER, self.transfer_id)
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunk {}/{} of transfer {}",
            self.name,
            self.index + 1,
            self.total,
            self.transfer_id
        )
    }
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// What a PUT writes to, decided once from the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    File(String),
    Chunk(ChunkName),
}

impl UploadTarget {
    pub fn parse(path: &str, chunked: bool) -> Result<Self, DavError> {
        if chunked {
            ChunkName::parse(path).map(UploadTarget::Chunk)
        } else {
            Ok(UploadTarget::File(path.to_string()))
        }
    }
}

/// Chunk indices of one transfer present in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSet {
    pub transfer_id: String,
    pub total: u32,
    pub received: BTreeSet<u32>,
}

impl ChunkSet {
    /// First index below `index` that has not been received.
    pub fn missing_before(&self, index: u32) -> Option<u32> {
        (0..index).find(|i| !self.received.contains(i))
    }
}

/// Chunk storage under the uploads directory of a storage.
pub struct ChunkStore<'a> {
    storage: &'a dyn Storage,
    uploads_dir: String,
}

impl<'a> ChunkStore<'a> {
    /// `uploads_dir` is canonical.
    pub fn new(storage: &'a dyn Storage, uploads_dir: impl Into<String>) -> Self {
        Self {
            storage,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Lock key serializing work on one transfer.
    pub fn transfer_key(&self, chunk: &ChunkName) -> String {
        view::join(&self.uploads_dir, chunk.prefix().trim_end_matches('-'))
    }

    fn chunk_path(&self, chunk: &ChunkName, index: u32) -> String {
        view::join(&self.uploads_dir, &format!("{}{}", chunk.prefix(), index))
    }

    /// Stores the body of a non-final chunk. Returns the bytes stored.
    pub fn store(&self, chunk: &ChunkName, body: &mut dyn Read) -> Result<u64, StorageError> {
        let path = self.chunk_path(chunk, chunk.index);
        let staged = StagedFile::write(self.storage, &path, body)?;
        let len = staged.len();
        staged.commit(&path)?;
        debug!("stored {} ({} bytes)", chunk, len);
        Ok(len)
    }

    pub fn chunk_set(&self, chunk: &ChunkName) -> Result<ChunkSet, StorageError> {
        let mut received = BTreeSet::new();
        for index in 0..chunk.total {
            if self.storage.exists(&self.chunk_path(chunk, index))? {
                received.insert(index);
            }
        }
        Ok(ChunkSet {
            transfer_id: chunk.transfer_id.clone(),
            total: chunk.total,
            received,
        })
    }

    /// Stored chunks `0..chunk.index` in order, followed by `last`.
    pub fn assemble<'b, R>(&'b self, chunk: &ChunkName, last: &'b mut R) -> AssembledChunks<'b, R>
    where
        R: Read + ?Sized,
    {
        AssembledChunks {
            storage: self.storage,
            pending: (0..chunk.index)
                .map(|index| self.chunk_path(chunk, index))
                .collect(),
            current: None,
            last,
        }
    }

    /// Removes the stored chunks of the transfer listed in `chunks`.
    pub fn invalidate(&self, chunk: &ChunkName, chunks: &ChunkSet) {
        for &index in &chunks.received {
            let path = self.chunk_path(chunk, index);
            if let Err(err) = self.storage.unlink(&path) {
                warn!("failed to remove chunk {}: {}", path, err);
            }
        }
        debug!("removed stored chunks of transfer {}", chunk.transfer_id);
    }
}

/// Reader over stored chunks opened one at a time, then the final body.
pub struct AssembledChunks<'a, R: ?Sized> {
    storage: &'a dyn Storage,
    pending: VecDeque<String>,
    current: Option<Box<dyn Read + Send>>,
    last: &'a mut R,
}

impl<R: Read + ?Sized> Read for AssembledChunks<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                let n = reader.read(buf)?;
                if n > 0 || buf.is_empty() {
                    return Ok(n);
                }
                self.current = None;
            }
            match self.pending.pop_front() {
                Some(path) => {
                    let reader = self.storage.open_read(&path).map_err(StorageError::into_io)?;
                    self.current = Some(reader);
                }
                None => return self.last.read(buf),
            }
        }
    }
}
