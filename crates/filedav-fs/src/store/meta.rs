use filedav_core::{FileInfo, FileInfoUpdate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Per-file metadata kept in a TOML sidecar under the state directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentHash>,
}

/// blake3 of the file content, valid while size and mtime are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub hash: String,
    pub size: u64,
    pub mtime_ns: i64,
}

impl FileMeta {
    pub fn info(&self) -> FileInfo {
        FileInfo {
            upload_time: self.upload_time,
            creation_time: self.creation_time,
            checksum: self.checksum.clone(),
        }
    }

    pub fn apply(&mut self, update: &FileInfoUpdate) {
        let mut info = self.info();
        info.apply(update);
        self.upload_time = info.upload_time;
        self.creation_time = info.creation_time;
        self.checksum = info.checksum;
    }

    pub fn is_empty(&self) -> bool {
        self == &FileMeta::default()
    }

    /// Missing sidecar reads as empty metadata.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };
        toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Atomically replaces the sidecar at `path`; empty metadata removes it.
    pub fn store(&self, path: &Path) -> io::Result<()> {
        if self.is_empty() {
            return remove_if_exists(path);
        }
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sidecar has no parent"))?;
        fs::create_dir_all(parent)?;

        let text = toml::to_string_pretty(self).map_err(io::Error::other)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".tmp.meta-")
            .suffix(".toml")
            .tempfile_in(parent)?;
        io::Write::write_all(temp.as_file_mut(), text.as_bytes())?;
        persist_tempfile(temp, path)
    }
}

fn persist_tempfile(temp: NamedTempFile, final_path: &Path) -> io::Result<()> {
    temp.persist(final_path).map(|_| ()).map_err(|err| err.error)
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
