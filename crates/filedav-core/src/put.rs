//! The PUT state machine.
//!
//! ```text
//! request ─► [chunk store | chunk assembly] ─► staged write ─► validation
//!         ─► pre hooks ─► exclusive lock ─► rename ─► shared lock
//!         ─► mtime / file info ─► post hooks ─► etag
//! ```
//!
//! The target is shared-locked from the first check to the end of the call
//! and exclusive only around the rename. Part files and locks are guards, so
//! every early return cleans up after itself. Collaborator failures leave
//! through `?` and are translated into [`DavError`] on the way out.

use crate::chunking::{ChunkName, ChunkStore, UploadTarget};
use crate::error::{BadRequestKind, DavError};
use crate::lock::{LockMode, LockProvider, PathLock};
use crate::mtime::parse_timestamp;
use crate::notify::{HookOutcome, NotificationSink, NullSink, Signal};
use crate::request::{Method, UploadHeaders, UploadRequest};
use crate::staging::StagedFile;
use crate::storage::{FileInfoUpdate, Storage};
use crate::validate::{AccessPolicy, AllowAll, PathRules, UploadValidator};
use crate::view::View;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::io::Read;
use std::sync::Arc;

pub const DEFAULT_UPLOADS_DIR: &str = "/.filedav/uploads";

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root of the caller's view; request paths are relative to it.
    pub view: View,
    /// Root the notification sink sees paths relative to.
    pub hook_view: View,
    /// Canonical directory holding stored chunks.
    pub uploads_dir: String,
    pub rules: PathRules,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            view: View::default(),
            hook_view: View::default(),
            uploads_dir: DEFAULT_UPLOADS_DIR.to_string(),
            rules: PathRules::default(),
        }
    }
}

/// Final state of a committed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// View-relative path of the file.
    pub path: String,
    pub etag: String,
    pub mtime: i64,
    pub size: u64,
    /// `true` if the PUT created the file, `false` if it replaced one.
    pub created: bool,
    pub mtime_accepted: bool,
    pub ctime_accepted: bool,
    pub checksum: Option<String>,
}

impl CommitResult {
    /// The etag as sent in an `ETag` header.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A non-final chunk was stored; no file was produced.
    ChunkAccepted {
        transfer_id: String,
        index: u32,
        total: u32,
        stored: u64,
    },
    Committed(CommitResult),
}

impl PutOutcome {
    pub fn etag(&self) -> Option<&str> {
        match self {
            PutOutcome::Committed(result) => Some(&result.etag),
            PutOutcome::ChunkAccepted { .. } => None,
        }
    }

    pub fn committed(&self) -> Option<&CommitResult> {
        match self {
            PutOutcome::Committed(result) => Some(result),
            PutOutcome::ChunkAccepted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClientTimes {
    mtime: Option<i64>,
    ctime: Option<i64>,
}

/// Handles PUT requests against one storage.
pub struct UploadHandler {
    storage: Arc<dyn Storage>,
    locks: Arc<dyn LockProvider>,
    sink: Arc<dyn NotificationSink>,
    access: Arc<dyn AccessPolicy>,
    config: UploadConfig,
}

impl UploadHandler {
    pub fn new(storage: Arc<dyn Storage>, locks: Arc<dyn LockProvider>) -> Self {
        Self {
            storage,
            locks,
            sink: Arc::new(NullSink),
            access: Arc::new(AllowAll),
            config: UploadConfig::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_access(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }

    pub fn with_config(mut self, config: UploadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stores the request body at the request path.
    ///
    /// Returns [`PutOutcome::ChunkAccepted`] for a non-final chunk and the
    /// committed file otherwise. On error nothing was committed, no part file
    /// is left behind and every lock taken has been released.
    pub fn put(&self, request: UploadRequest) -> Result<PutOutcome, DavError> {
        let UploadRequest {
            path,
            mut body,
            headers,
        } = request;

        let result = UploadTarget::parse(&path, headers.oc_chunked).and_then(|target| match target {
            UploadTarget::File(path) => self
                .put_file(&path, &mut *body, &headers)
                .map(PutOutcome::Committed),
            UploadTarget::Chunk(chunk) => self.put_chunk(&chunk, &mut *body, &headers),
        });

        if let Err(err) = &result {
            match err {
                DavError::FileLocked { .. } => debug!("PUT {}: {}", path, err),
                _ if err.status() >= 500 => error!("PUT {} failed: {:?}", path, err),
                _ => warn!("PUT {} rejected: {}", path, err),
            }
        }
        result
    }

    fn validator(&self) -> UploadValidator<'_> {
        UploadValidator::new(&*self.storage, &*self.access, &self.config.rules)
            .reserving(&self.config.uploads_dir)
    }

    fn put_file(
        &self,
        path: &str,
        body: &mut dyn Read,
        headers: &UploadHeaders,
    ) -> Result<CommitResult, DavError> {
        let target = self.config.view.absolute(path)?;
        let times = client_times(headers)?;
        let validator = self.validator();
        validator.check_path(&target)?;

        let mut lock = PathLock::shared(&*self.locks, target.as_str())?;
        let exists = self.storage.exists(&target)?;
        validator.check_permission(&target, exists)?;
        validator.check_quota(&target, headers.content_length)?;

        let staged = StagedFile::write(&*self.storage, &target, body)?;
        if headers.method == Method::Put {
            validator.check_size(headers.content_length, staged.len())?;
        }

        self.commit(staged, &target, &mut lock, exists, times, headers)
    }

    fn put_chunk(
        &self,
        chunk: &ChunkName,
        body: &mut dyn Read,
        headers: &UploadHeaders,
    ) -> Result<PutOutcome, DavError> {
        let target = self.config.view.absolute(&chunk.target_path())?;
        let validator = self.validator();
        validator.check_path(&target)?;

        let store = ChunkStore::new(&*self.storage, self.config.uploads_dir.as_str());
        let transfer_key = store.transfer_key(chunk);

        if !chunk.is_last() {
            let _transfer = PathLock::shared(&*self.locks, transfer_key)?;
            validator.check_quota(&target, headers.total_length.or(headers.content_length))?;
            let stored = store.store(chunk, body)?;
            return Ok(PutOutcome::ChunkAccepted {
                transfer_id: chunk.transfer_id.clone(),
                index: chunk.index,
                total: chunk.total,
                stored,
            });
        }

        let times = client_times(headers)?;
        let _transfer = PathLock::exclusive(&*self.locks, transfer_key)?;
        let chunks = store.chunk_set(chunk)?;
        if let Some(missing) = chunks.missing_before(chunk.index) {
            store.invalidate(chunk, &chunks);
            return Err(DavError::bad_request(
                BadRequestKind::IncompleteChunks,
                format!(
                    "chunk {} of transfer {} is missing, the upload has to be restarted",
                    missing, chunk.transfer_id
                ),
            ));
        }

        let mut lock = PathLock::shared(&*self.locks, target.as_str())?;
        let exists = self.storage.exists(&target)?;
        validator.check_permission(&target, exists)?;

        let staged = {
            let mut assembled = store.assemble(chunk, body);
            StagedFile::write(&*self.storage, &target, &mut assembled)?
        };
        store.invalidate(chunk, &chunks);
        debug!("assembled {} chunks into {}", chunk.total, staged.path());

        self.commit(staged, &target, &mut lock, exists, times, headers)
            .map(PutOutcome::Committed)
    }

    fn commit(
        &self,
        staged: StagedFile<'_>,
        target: &str,
        lock: &mut PathLock<'_>,
        exists: bool,
        times: ClientTimes,
        headers: &UploadHeaders,
    ) -> Result<CommitResult, DavError> {
        let (pre, post) = if exists {
            (Signal::Update, Signal::PostUpdate)
        } else {
            (Signal::Create, Signal::PostCreate)
        };
        let hook_path = self.config.hook_view.relative(target);

        if let Some(hook_path) = hook_path.as_deref() {
            for signal in [pre, Signal::Write] {
                if self.sink.emit(signal, hook_path) == HookOutcome::Veto {
                    return Err(DavError::server_error(format!(
                        "could not write {}, canceled by {} hook",
                        hook_path, signal
                    )));
                }
            }
        }

        lock.change(LockMode::Exclusive)?;
        staged.commit(target)?;
        lock.change(LockMode::Shared)?;

        let mtime_accepted = match times.mtime {
            Some(mtime) => self.storage.touch(target, mtime)?,
            None => false,
        };

        let checksum = headers
            .checksum
            .as_deref()
            .map(str::trim)
            .filter(|checksum| !checksum.is_empty());
        let checksum_update = match checksum {
            Some(checksum) => Some(checksum.to_string()),
            None if self.storage.file_info(target)?.checksum.is_some() => Some(String::new()),
            None => None,
        };
        self.storage.put_file_info(
            target,
            &FileInfoUpdate {
                upload_time: Some(Utc::now().timestamp()),
                creation_time: times.ctime,
                checksum: checksum_update,
            },
        )?;

        if let Some(hook_path) = hook_path.as_deref() {
            for signal in [post, Signal::PostWrite] {
                self.sink.emit(signal, hook_path);
            }
        }

        let result = CommitResult {
            path: self
                .config
                .view
                .relative(target)
                .unwrap_or_else(|| target.to_string()),
            etag: self.storage.etag(target)?,
            mtime: self.storage.mtime(target)?,
            size: self.storage.size(target)?,
            created: !exists,
            mtime_accepted,
            ctime_accepted: times.ctime.is_some(),
            checksum: checksum.map(str::to_string),
        };
        info!(
            "{} {} ({} bytes, etag {})",
            if exists { "updated" } else { "created" },
            target,
            result.size,
            result.etag
        );
        Ok(result)
    }
}

fn client_times(headers: &UploadHeaders) -> Result<ClientTimes, DavError> {
    let parse = |header: &str, raw: &Option<String>| {
        raw.as_deref()
            .map(|raw| parse_timestamp(header, raw))
            .transpose()
    };
    Ok(ClientTimes {
        mtime: parse("X-OC-MTime", &headers.mtime)?,
        ctime: parse("X-OC-CTime", &headers.ctime)?,
    })
}
