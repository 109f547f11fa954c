use crate::error::{BadRequestKind, DavError, ForbiddenKind, StorageError};
use crate::staging::is_part_file_name;
use crate::storage::Storage;
use crate::view;

/// Permission collaborator.
pub trait AccessPolicy: Send + Sync {
    fn can_create(&self, path: &str) -> bool;
    fn can_update(&self, path: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_create(&self, _path: &str) -> bool {
        true
    }

    fn can_update(&self, _path: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnly;

impl AccessPolicy for ReadOnly {
    fn can_create(&self, _path: &str) -> bool {
        false
    }

    fn can_update(&self, _path: &str) -> bool {
        false
    }
}

pub const DEFAULT_FORBIDDEN_CHARS: &str = "\\/:*?\"<>|";

/// File name rules shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    pub forbidden_chars: String,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            forbidden_chars: DEFAULT_FORBIDDEN_CHARS.to_string(),
        }
    }
}

impl PathRules {
    pub fn verify_name(&self, name: &str) -> Result<(), StorageError> {
        let invalid = |reason: &str| StorageError::InvalidPath(format!("{:?} {}", name, reason));
        if name.is_empty() || name == "." || name == ".." {
            return Err(invalid("is not a valid file name"));
        }
        if name.trim() != name {
            return Err(invalid("has leading or trailing whitespace"));
        }
        if name.chars().any(char::is_control) {
            return Err(invalid("contains control characters"));
        }
        if let Some(c) = name.chars().find(|c| self.forbidden_chars.contains(*c)) {
            return Err(invalid(&format!("contains forbidden character {:?}", c)));
        }
        Ok(())
    }
}

/// Checks a PUT must pass before its content may be committed.
pub struct UploadValidator<'a> {
    storage: &'a dyn Storage,
    access: &'a dyn AccessPolicy,
    rules: &'a PathRules,
    reserved: Option<&'a str>,
}

impl<'a> UploadValidator<'a> {
    pub fn new(storage: &'a dyn Storage, access: &'a dyn AccessPolicy, rules: &'a PathRules) -> Self {
        Self {
            storage,
            access,
            rules,
            reserved: None,
        }
    }

    /// Refuses targets at or below the canonical directory `dir`.
    pub fn reserving(mut self, dir: &'a str) -> Self {
        self.reserved = Some(dir);
        self
    }

    /// Path legality of the canonical target `path`.
    ///
    /// The last segment is held to the name rules; every segment must not be
    /// a part file name and the whole path must stay clear of the reserved
    /// directory.
    pub fn check_path(&self, path: &str) -> Result<(), DavError> {
        let (_, name) = view::split(path);
        self.rules.verify_name(name)?;
        self.storage.verify_name(name)?;
        if let Some(segment) = path.split('/').find(|segment| is_part_file_name(segment)) {
            return Err(StorageError::InvalidPath(format!(
                "{:?} is reserved for uploads in progress",
                segment
            ))
            .into());
        }
        if let Some(dir) = self.reserved.filter(|dir| view::is_within(path, dir)) {
            return Err(StorageError::InvalidPath(format!("{} is reserved by {}", path, dir)).into());
        }
        self.storage.verify_path(path)?;
        Ok(())
    }

    /// Create permission for a new file, update permission for an existing one.
    pub fn check_permission(&self, path: &str, exists: bool) -> Result<(), DavError> {
        let allowed = if exists {
            self.access.can_update(path)
        } else {
            self.access.can_create(path)
        };
        if allowed {
            return Ok(());
        }
        let action = if exists { "update" } else { "create" };
        Err(DavError::forbidden(
            ForbiddenKind::Permission,
            format!("no permission to {} {}", action, path),
        ))
    }

    /// Rejects a declared length the storage has no room for.
    pub fn check_quota(&self, path: &str, declared: Option<u64>) -> Result<(), DavError> {
        let Some(length) = declared else {
            return Ok(());
        };
        let (dir, _) = view::split(path);
        if let Some(free) = self.storage.free_space(dir)? {
            if length > free {
                return Err(StorageError::EntityTooLarge(format!(
                    "{} bytes requested, {} bytes free",
                    length, free
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Compares the declared Content-Length with the bytes staged.
    pub fn check_size(&self, declared: Option<u64>, staged: u64) -> Result<(), DavError> {
        match declared {
            Some(expected) if expected != staged => Err(DavError::bad_request(
                BadRequestKind::SizeMismatch,
                format!(
                    "expected filesize of {} bytes but read and wrote {} bytes; \
                     either the transfer was interrupted or writing to the storage failed",
                    expected, staged
                ),
            )),
            _ => Ok(()),
        }
    }
}
