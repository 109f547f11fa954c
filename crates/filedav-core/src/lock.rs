//! Advisory path locks held for the duration of an upload.
//!
//! A PUT holds a shared lock on its target from the first check to the end of
//! the request and changes it to exclusive only around the final rename.
//! [`PathLock`] releases whatever mode it holds when dropped, so every exit
//! path gives back what it took.

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("shared"),
            LockMode::Exclusive => f.write_str("exclusive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Another operation holds a conflicting lock.
    #[error("\"{path}\" is locked, cannot acquire {mode} lock")]
    Locked { path: String, mode: LockMode },

    /// The lock expected to be held is gone (expired or never taken).
    #[error("{mode} lock on \"{path}\" is not held")]
    NotHeld { path: String, mode: LockMode },
}

/// Locking collaborator.
///
/// Implementations must not block: contention is reported as
/// [`LockError::Locked`] and the caller decides what to do.
pub trait LockProvider: Send + Sync {
    fn acquire(&self, path: &str, mode: LockMode) -> Result<(), LockError>;

    fn release(&self, path: &str, mode: LockMode) -> Result<(), LockError>;

    /// Converts a held lock from one mode to the other.
    fn change(&self, path: &str, from: LockMode, to: LockMode) -> Result<(), LockError>;
}

/// A lock on one path, released on drop.
pub struct PathLock<'a> {
    provider: &'a dyn LockProvider,
    path: String,
    mode: LockMode,
}

impl<'a> PathLock<'a> {
    pub fn acquire(
        provider: &'a dyn LockProvider,
        path: impl Into<String>,
        mode: LockMode,
    ) -> Result<Self, LockError> {
        let path = path.into();
        provider.acquire(&path, mode)?;
        debug!("acquired {} lock on {}", mode, path);
        Ok(Self {
            provider,
            path,
            mode,
        })
    }

    pub fn shared(provider: &'a dyn LockProvider, path: impl Into<String>) -> Result<Self, LockError> {
        Self::acquire(provider, path, LockMode::Shared)
    }

    pub fn exclusive(
        provider: &'a dyn LockProvider,
        path: impl Into<String>,
    ) -> Result<Self, LockError> {
        Self::acquire(provider, path, LockMode::Exclusive)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Switches the held lock to `mode`. On failure the lock keeps its old mode.
    pub fn change(&mut self, mode: LockMode) -> Result<(), LockError> {
        if self.mode == mode {
            return Ok(());
        }
        self.provider.change(&self.path, self.mode, mode)?;
        debug!("changed lock on {} from {} to {}", self.path, self.mode, mode);
        self.mode = mode;
        Ok(())
    }
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        match self.provider.release(&self.path, self.mode) {
            Ok(()) => debug!("released {} lock on {}", self.mode, self.path),
            Err(err) => warn!("releasing lock failed: {}", err),
        }
    }
}

impl fmt::Debug for PathLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLock")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    pub shared: usize,
    pub exclusive: bool,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.shared == 0 && !self.exclusive
    }
}

/// In-process lock table.
///
/// Shared locks are counted; an exclusive lock requires that nobody else
/// holds the path. Changing shared to exclusive succeeds only for the sole
/// shared holder.
#[derive(Debug, Default)]
pub struct MemoryLockProvider {
    locks: Mutex<HashMap<String, LockState>>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `path`, `None` when nothing is held.
    pub fn state(&self, path: &str) -> Option<LockState> {
        self.table().get(path).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockState>> {
        // A panic while holding the table leaves it consistent; keep serving.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LockProvider for MemoryLockProvider {
    fn acquire(&self, path: &str, mode: LockMode) -> Result<(), LockError> {
        let mut table = self.table();
        let state = table.entry(path.to_string()).or_default();
        let granted = match mode {
            LockMode::Shared if !state.exclusive => {
                state.shared += 1;
                true
            }
            LockMode::Exclusive if state.is_free() => {
                state.exclusive = true;
                true
            }
            _ => false,
        };
        if !granted {
            return Err(LockError::Locked {
                path: path.to_string(),
                mode,
            });
        }
        Ok(())
    }

    fn release(&self, path: &str, mode: LockMode) -> Result<(), LockError> {
        let mut table = self.table();
        let not_held = || LockError::NotHeld {
            path: path.to_string(),
            mode,
        };
        let state = table.get_mut(path).ok_or_else(not_held)?;
        match mode {
            LockMode::Shared if state.shared > 0 => state.shared -= 1,
            LockMode::Exclusive if state.exclusive => state.exclusive = false,
            _ => return Err(not_held()),
        }
        if state.is_free() {
            table.remove(path);
        }
        Ok(())
    }

    fn change(&self, path: &str, from: LockMode, to: LockMode) -> Result<(), LockError> {
        let mut table = self.table();
        let state = table.get_mut(path).ok_or_else(|| LockError::NotHeld {
            path: path.to_string(),
            mode: from,
        })?;
        match (from, to) {
            (LockMode::Shared, LockMode::Exclusive) => {
                if state.shared == 0 {
                    return Err(LockError::NotHeld {
                        path: path.to_string(),
                        mode: from,
                    });
                }
                if state.shared > 1 || state.exclusive {
                    return Err(LockError::Locked {
                        path: path.to_string(),
                        mode: to,
                    });
                }
                state.shared = 0;
                state.exclusive = true;
            }
            (LockMode::Exclusive, LockMode::Shared) => {
                if !state.exclusive {
                    return Err(LockError::NotHeld {
                        path: path.to_string(),
                        mode: from,
                    });
                }
                state.exclusive = false;
                state.shared = 1;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_stack_and_block_exclusive() {
        let locks = MemoryLockProvider::new();
        let a = PathLock::shared(&locks, "/f").unwrap();
        let b = PathLock::shared(&locks, "/f").unwrap();
        assert_eq!(locks.state("/f").unwrap().shared, 2);
        assert!(PathLock::exclusive(&locks, "/f").is_err());
        drop(a);
        drop(b);
        assert!(locks.is_empty());
        let _c = PathLock::exclusive(&locks, "/f").unwrap();
        assert!(PathLock::shared(&locks, "/f").is_err());
    }

    #[test]
    fn change_requires_sole_holder() {
        let locks = MemoryLockProvider::new();
        let mut mine = PathLock::shared(&locks, "/f").unwrap();
        let other = PathLock::shared(&locks, "/f").unwrap();
        let err = mine.change(LockMode::Exclusive).unwrap_err();
        assert!(matches!(err, LockError::Locked { .. }));
        assert_eq!(mine.mode(), LockMode::Shared);

        drop(other);
        mine.change(LockMode::Exclusive).unwrap();
        assert!(locks.state("/f").unwrap().exclusive);
        mine.change(LockMode::Shared).unwrap();
        drop(mine);
        assert!(locks.is_empty());
    }

    #[test]
    fn releasing_a_lost_lock_is_reported() {
        let locks = MemoryLockProvider::new();
        let err = locks.release("/gone", LockMode::Shared).unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
        let err = locks
            .change("/gone", LockMode::Shared, LockMode::Exclusive)
            .unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
    }

    #[test]
    fn failed_acquire_leaves_no_entry() {
        let locks = MemoryLockProvider::new();
        let held = PathLock::exclusive(&locks, "/f").unwrap();
        assert!(locks.acquire("/f", LockMode::Exclusive).is_err());
        drop(held);
        assert!(locks.is_empty());
    }
}
