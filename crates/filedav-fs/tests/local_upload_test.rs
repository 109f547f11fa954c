use filedav_core::{
    MemoryLockProvider, PutOutcome, Storage, UploadHandler, UploadRequest, DEFAULT_UPLOADS_DIR,
};
use filedav_fs::store::FileMeta;
use filedav_fs::LocalStorage;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn handler(dir: &Path) -> (Arc<LocalStorage>, UploadHandler) {
    let storage = Arc::new(LocalStorage::new(dir));
    let handler = UploadHandler::new(storage.clone(), Arc::new(MemoryLockProvider::new()));
    (storage, handler)
}

/// Every file below `dir`, skipping the server state directory.
fn user_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(dir).unwrap().to_string_lossy().to_string();
            if rel == ".filedav" {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(rel);
            }
        }
    }
    files.sort();
    files
}

#[test]
fn put_creates_then_replaces_file_on_disk() {
    let dir = TempDir::new().unwrap();
    let (storage, handler) = handler(dir.path());

    let first = handler
        .put(
            UploadRequest::new("/docs/report.txt", &b"draft"[..])
                .content_length(5)
                .mtime("1500000000"),
        )
        .unwrap();
    let first = first.committed().unwrap().clone();
    assert!(first.created);
    assert!(first.mtime_accepted);
    assert_eq!(fs::read(dir.path().join("docs/report.txt")).unwrap(), b"draft");
    assert_eq!(storage.mtime("/docs/report.txt").unwrap(), 1500000000);

    let second = handler
        .put(UploadRequest::new("/docs/report.txt", &b"final"[..]).content_length(5))
        .unwrap();
    let second = second.committed().unwrap();
    assert!(!second.created);
    assert_ne!(first.etag, second.etag);
    assert_eq!(fs::read(dir.path().join("docs/report.txt")).unwrap(), b"final");
    assert_eq!(user_files(dir.path()), vec!["docs/report.txt".to_string()]);
}

#[test]
fn failed_put_leaves_no_part_file_and_keeps_old_content() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = handler(dir.path());
    handler
        .put(UploadRequest::new("/a.txt", &b"keep"[..]).content_length(4))
        .unwrap();

    let err = handler
        .put(UploadRequest::new("/a.txt", &b"short"[..]).content_length(50))
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"keep");
    assert_eq!(user_files(dir.path()), vec!["a.txt".to_string()]);
}

#[test]
fn quota_rejects_oversized_upload() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path()).with_quota(Some(8)));
    let handler = UploadHandler::new(storage, Arc::new(MemoryLockProvider::new()));

    let err = handler
        .put(UploadRequest::new("/big.bin", Cursor::new(vec![7u8; 64])))
        .unwrap_err();
    assert_eq!(err.status(), 413);
    assert!(user_files(dir.path()).is_empty());

    let err = handler
        .put(UploadRequest::new("/big.bin", Cursor::new(vec![7u8; 64])).content_length(64))
        .unwrap_err();
    assert_eq!(err.status(), 413);
}

#[test]
fn checksum_and_ctime_land_in_sidecar() {
    let dir = TempDir::new().unwrap();
    let (storage, handler) = handler(dir.path());

    let outcome = handler
        .put(
            UploadRequest::new("/photo.jpg", &b"jpeg"[..])
                .content_length(4)
                .ctime("1400000000")
                .checksum("SHA1:deadbeef"),
        )
        .unwrap();
    let result = outcome.committed().unwrap();
    assert!(result.ctime_accepted);
    assert_eq!(result.checksum.as_deref(), Some("SHA1:deadbeef"));

    let info = storage.file_info("/photo.jpg").unwrap();
    assert_eq!(info.creation_time, Some(1400000000));
    assert_eq!(info.checksum.as_deref(), Some("SHA1:deadbeef"));
    assert!(info.upload_time.is_some());

    let sidecar = dir.path().join(".filedav/meta/photo.jpg.toml");
    let meta = FileMeta::load(&sidecar).unwrap();
    assert_eq!(meta.checksum.as_deref(), Some("SHA1:deadbeef"));

    storage.unlink("/photo.jpg").unwrap();
    assert!(!sidecar.exists());
}

#[test]
fn chunked_upload_assembles_on_disk() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = handler(dir.path());
    let parts: [&'static [u8]; 3] = [b"alpha-", b"beta-", b"gamma"];

    for (index, body) in parts.iter().enumerate() {
        let outcome = handler
            .put(
                UploadRequest::new(format!("/video.mp4-chunking-77-3-{}", index), *body)
                    .content_length(body.len() as u64)
                    .chunked(),
            )
            .unwrap();
        if index < 2 {
            assert!(matches!(outcome, PutOutcome::ChunkAccepted { .. }));
            assert!(dir
                .path()
                .join(DEFAULT_UPLOADS_DIR.trim_start_matches('/'))
                .join(format!("video.mp4-chunking-77-{}", index))
                .is_file());
        } else {
            assert!(outcome.committed().unwrap().created);
        }
    }

    assert_eq!(
        fs::read(dir.path().join("video.mp4")).unwrap(),
        b"alpha-beta-gamma"
    );
    assert_eq!(user_files(dir.path()), vec!["video.mp4".to_string()]);
}

#[test]
fn reserved_names_are_refused() {
    let dir = TempDir::new().unwrap();
    let (_, handler) = handler(dir.path());

    let err = handler
        .put(UploadRequest::new("/.filedav", &b"x"[..]))
        .unwrap_err();
    assert_eq!(err.status(), 403);
    assert_eq!(err.name(), "InvalidPath");
}

#[test]
fn state_directory_cannot_be_written_through_put() {
    let dir = TempDir::new().unwrap();
    let (storage, handler) = handler(dir.path());
    handler
        .put(
            UploadRequest::new("/a.txt", &b"one"[..])
                .content_length(3)
                .checksum("MD5:0123"),
        )
        .unwrap();
    let sidecar = dir.path().join(".filedav/meta/a.txt.toml");
    let before = fs::read(&sidecar).unwrap();

    for path in [
        "/.filedav/meta/a.txt.toml",
        "/.filedav/uploads/a.txt-chunking-1-0",
        "/docs/.filedav/x.txt",
    ] {
        let err = handler
            .put(UploadRequest::new(path, &b"garbage ["[..]))
            .unwrap_err();
        assert_eq!(err.status(), 403, "{}", path);
        assert_eq!(err.name(), "InvalidPath", "{}", path);
    }
    assert_eq!(fs::read(&sidecar).unwrap(), before);
    assert!(!dir.path().join("docs").exists());

    let outcome = handler
        .put(UploadRequest::new("/a.txt", &b"two"[..]).content_length(3))
        .unwrap();
    assert!(!outcome.committed().unwrap().created);
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"two");
    assert_eq!(
        storage.file_info("/a.txt").unwrap().checksum.as_deref(),
        None
    );
}
