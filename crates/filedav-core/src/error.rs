use crate::lock::LockError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failures raised by the storage, locking and permission collaborators.
///
/// The set is closed: every collaborator failure is one of these kinds, and
/// [`DavError::from`] maps each kind to exactly one protocol outcome.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write produced no bytes or reported failure without a cause.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The caller lacks the permission for the operation.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// The upload exceeds a size limit or the available quota.
    #[error("entity too large: {0}")]
    EntityTooLarge(String),

    /// The content was rejected (virus scanner, content policy).
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// The path is not legal for the backend.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Refused by a policy; `retry` tells the client whether retrying can help.
    #[error("forbidden: {message}")]
    Forbidden { message: String, retry: bool },

    /// A lock could not be acquired or was lost.
    #[error(transparent)]
    Locked(#[from] LockError),

    /// The encryption layer failed or is not ready.
    #[error("encryption failure: {0}")]
    Encryption(String),

    /// The storage is temporarily unavailable.
    #[error("storage not available: {0}")]
    NotAvailable(String),

    /// Anything else.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StorageError::Other(err.into())
    }

    /// Wraps the failure so it can travel through `std::io::Write`.
    ///
    /// `StorageError::from(io::Error)` unwraps it again.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        let err = match err.downcast::<StorageError>() {
            Ok(inner) => return inner,
            Err(err) => err,
        };
        match err.kind() {
            io::ErrorKind::PermissionDenied => StorageError::NotPermitted(err.to_string()),
            io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge => {
                StorageError::EntityTooLarge(err.to_string())
            }
            _ => StorageError::Other(Box::new(err)),
        }
    }
}

/// Why a request was rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestKind {
    /// Declared Content-Length differs from the bytes received.
    SizeMismatch,
    /// A client timestamp header failed validation.
    InvalidArgument,
    /// The chunked-upload file name could not be decoded.
    MalformedChunk,
    /// The final chunk arrived while an earlier chunk is missing.
    IncompleteChunks,
}

impl fmt::Display for BadRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BadRequestKind::SizeMismatch => "size mismatch",
            BadRequestKind::InvalidArgument => "invalid argument",
            BadRequestKind::MalformedChunk => "malformed chunk",
            BadRequestKind::IncompleteChunks => "incomplete chunks",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenKind {
    Permission,
    Policy,
    InvalidPath,
}

/// Protocol-level outcome of a failed PUT.
///
/// This is the only error type that leaves [`UploadHandler::put`]. Outcomes
/// translated from a collaborator failure keep it as `source`.
///
/// [`UploadHandler::put`]: crate::UploadHandler::put
#[derive(Debug, Error)]
pub enum DavError {
    #[error("bad request ({kind}): {message}")]
    BadRequest { kind: BadRequestKind, message: String },

    #[error("forbidden: {message}")]
    Forbidden {
        kind: ForbiddenKind,
        message: String,
        retry: bool,
        #[source]
        source: Option<StorageError>,
    },

    #[error("entity too large: {message}")]
    EntityTooLarge {
        message: String,
        #[source]
        source: Option<StorageError>,
    },

    #[error("unsupported media type: {message}")]
    UnsupportedMediaType {
        message: String,
        #[source]
        source: Option<StorageError>,
    },

    #[error("file locked: {message}")]
    FileLocked {
        message: String,
        #[source]
        source: Option<StorageError>,
    },

    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        #[source]
        source: Option<StorageError>,
    },

    #[error("internal server error: {message}")]
    GenericServerError {
        message: String,
        #[source]
        source: Option<StorageError>,
    },
}

impl DavError {
    pub fn bad_request(kind: BadRequestKind, message: impl Into<String>) -> Self {
        DavError::BadRequest {
            kind,
            message: message.into(),
        }
    }

    pub fn forbidden(kind: ForbiddenKind, message: impl Into<String>) -> Self {
        DavError::Forbidden {
            kind,
            message: message.into(),
            retry: false,
            source: None,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        DavError::GenericServerError {
            message: message.into(),
            source: None,
        }
    }

    /// HTTP status code for the outcome.
    pub fn status(&self) -> u16 {
        match self {
            DavError::BadRequest { .. } => 400,
            DavError::Forbidden { .. } => 403,
            DavError::EntityTooLarge { .. } => 413,
            DavError::UnsupportedMediaType { .. } => 415,
            DavError::FileLocked { .. } => 423,
            DavError::ServiceUnavailable { .. } => 503,
            DavError::GenericServerError { .. } => 500,
        }
    }

    /// Short outcome name, used in DAV error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            DavError::BadRequest { .. } => "BadRequest",
            DavError::Forbidden {
                kind: ForbiddenKind::InvalidPath,
                ..
            } => "InvalidPath",
            DavError::Forbidden { .. } => "Forbidden",
            DavError::EntityTooLarge { .. } => "EntityTooLarge",
            DavError::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            DavError::FileLocked { .. } => "FileLocked",
            DavError::ServiceUnavailable { .. } => "ServiceUnavailable",
            DavError::GenericServerError { .. } => "InternalServerError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DavError::BadRequest { message, .. }
            | DavError::Forbidden { message, .. }
            | DavError::EntityTooLarge { message, .. }
            | DavError::UnsupportedMediaType { message, .. }
            | DavError::FileLocked { message, .. }
            | DavError::ServiceUnavailable { message, .. }
            | DavError::GenericServerError { message, .. } => message,
        }
    }

    pub fn retry(&self) -> bool {
        matches!(self, DavError::Forbidden { retry: true, .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            DavError::BadRequest {
                kind: BadRequestKind::InvalidArgument,
                ..
            }
        )
    }
}

impl From<StorageError> for DavError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WriteFailed(_) | StorageError::Other(_) => DavError::GenericServerError {
                message: err.to_string(),
                source: Some(err),
            },
            StorageError::NotPermitted(_) => DavError::Forbidden {
                kind: ForbiddenKind::Permission,
                message: err.to_string(),
                retry: false,
                source: Some(err),
            },
            StorageError::EntityTooLarge(_) => DavError::EntityTooLarge {
                message: err.to_string(),
                source: Some(err),
            },
            StorageError::InvalidContent(_) => DavError::UnsupportedMediaType {
                message: err.to_string(),
                source: Some(err),
            },
            StorageError::InvalidPath(_) => DavError::Forbidden {
                kind: ForbiddenKind::InvalidPath,
                message: err.to_string(),
                retry: false,
                source: Some(err),
            },
            StorageError::Forbidden { retry, .. } => DavError::Forbidden {
                kind: ForbiddenKind::Policy,
                message: err.to_string(),
                retry,
                source: Some(err),
            },
            StorageError::Locked(_) => DavError::FileLocked {
                message: err.to_string(),
                source: Some(err),
            },
            StorageError::Encryption(_) => DavError::ServiceUnavailable {
                message: format!("encryption not ready: {}", err),
                source: Some(err),
            },
            StorageError::NotAvailable(_) => DavError::ServiceUnavailable {
                message: format!("failed to write file contents: {}", err),
                source: Some(err),
            },
        }
    }
}

impl From<LockError> for DavError {
    fn from(err: LockError) -> Self {
        DavError::from(StorageError::from(err))
    }
}
