use crate::error::StorageError;

/// A caller's window onto the storage, rooted at `root`.
///
/// Request paths are relative to the view; storage, lock and hook paths are
/// canonical. Two views over the same storage differ only in their root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    root: String,
}

impl Default for View {
    fn default() -> Self {
        Self {
            root: "/".to_string(),
        }
    }
}

impl View {
    pub fn new(root: &str) -> Result<Self, StorageError> {
        Ok(Self {
            root: normalize(root)?,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Canonical path of `path` inside this view.
    pub fn absolute(&self, path: &str) -> Result<String, StorageError> {
        let rel = normalize(path)?;
        if self.root == "/" {
            return Ok(rel);
        }
        if rel == "/" {
            return Ok(self.root.clone());
        }
        Ok(format!("{}{}", self.root, rel))
    }

    /// Path of canonical `abs` as seen through this view, `None` when it lies
    /// outside.
    pub fn relative(&self, abs: &str) -> Option<String> {
        if self.root == "/" {
            return Some(abs.to_string());
        }
        let rest = abs.strip_prefix(&self.root)?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }
}

/// Collapses separators and `.` segments; `..` is rejected.
pub fn normalize(path: &str) -> Result<String, StorageError> {
    let mut out = String::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            _ => {
                out.push('/');
                out.push_str(segment);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Splits a canonical path into parent directory and file name.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// `true` when canonical `path` is `dir` itself or lies below it.
pub fn is_within(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return true;
    }
    match path.strip_prefix(dir) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
