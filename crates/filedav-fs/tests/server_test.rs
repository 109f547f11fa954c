#![cfg(feature = "webdav")]

use filedav_fs::webdav::{serve_background, FileDav, FileDavServer};
use filedav_fs::ServerConfig;
use std::fs;
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Reply {
    status: u16,
    head: String,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

async fn start(dir: &TempDir, configure: impl FnOnce(&mut ServerConfig)) -> FileDavServer {
    let mut config = ServerConfig {
        root: dir.path().to_path_buf(),
        port: 0,
        ..ServerConfig::default()
    };
    configure(&mut config);
    let app = FileDav::from_config(&config).unwrap();
    serve_background(app, config.addr()).await.unwrap()
}

async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: {}\r\n",
        method,
        path,
        addr,
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).to_string();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw.as_str(), ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    Reply {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}

#[tokio::test]
async fn put_then_get_round_trip() {
    let dir = TempDir::new().unwrap();
    let server = start(&dir, |_| {}).await;
    let addr = server.addr();

    let created = request(
        addr,
        "PUT",
        "/notes.txt",
        &[("X-OC-MTime", "1600000000")],
        b"first",
    )
    .await;
    assert_eq!(created.status, 201);
    let etag = created.header("etag").unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(created.header("oc-etag"), Some(etag.as_str()));
    assert_eq!(created.header("x-oc-mtime"), Some("accepted"));
    assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"first");

    let replaced = request(addr, "PUT", "/notes.txt", &[], b"second").await;
    assert_eq!(replaced.status, 204);
    assert_ne!(replaced.header("etag"), Some(etag.as_str()));

    let fetched = request(addr, "GET", "/notes.txt", &[], b"").await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body, "second");

    server.shutdown();
}

#[tokio::test]
async fn failures_carry_a_dav_error_body() {
    let dir = TempDir::new().unwrap();
    let server = start(&dir, |_| {}).await;
    let addr = server.addr();

    let bad = request(addr, "PUT", "/a.txt", &[("X-OC-MTime", "yesterday")], b"data").await;
    assert_eq!(bad.status, 400);
    assert!(bad.header("content-type").unwrap().starts_with("application/xml"));
    assert!(bad.body.contains("<s:exception>BadRequest</s:exception>"));
    assert!(!dir.path().join("a.txt").exists());

    let reserved = request(addr, "PUT", "/.filedav", &[], b"x").await;
    assert_eq!(reserved.status, 403);
    assert!(reserved.body.contains("<s:exception>InvalidPath</s:exception>"));

    server.shutdown();
}

#[tokio::test]
async fn chunked_upload_over_http() {
    let dir = TempDir::new().unwrap();
    let server = start(&dir, |_| {}).await;
    let addr = server.addr();

    let first = request(
        addr,
        "PUT",
        "/big.iso-chunking-42-2-0",
        &[("OC-Chunked", "1")],
        b"head-",
    )
    .await;
    assert_eq!(first.status, 201);
    assert_eq!(first.header("etag"), None);
    assert!(!dir.path().join("big.iso").exists());

    let last = request(
        addr,
        "PUT",
        "/big.iso-chunking-42-2-1",
        &[("OC-Chunked", "1")],
        b"tail",
    )
    .await;
    assert_eq!(last.status, 201);
    assert!(last.header("etag").is_some());
    assert_eq!(fs::read(dir.path().join("big.iso")).unwrap(), b"head-tail");

    server.shutdown();
}

#[tokio::test]
async fn read_only_server_refuses_uploads_and_hides_state() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("existing.txt"), b"old").unwrap();
    fs::create_dir_all(dir.path().join(".filedav/meta")).unwrap();
    let server = start(&dir, |config| config.read_only = true).await;
    let addr = server.addr();

    let refused = request(addr, "PUT", "/existing.txt", &[], b"new").await;
    assert_eq!(refused.status, 403);
    assert_eq!(fs::read(dir.path().join("existing.txt")).unwrap(), b"old");

    let deleted = request(addr, "DELETE", "/existing.txt", &[], b"").await;
    assert_eq!(deleted.status, 403);

    let hidden = request(addr, "GET", "/.filedav/meta", &[], b"").await;
    assert_eq!(hidden.status, 404);

    server.shutdown();
}

#[tokio::test]
async fn deleting_through_dav_frees_quota() {
    let dir = TempDir::new().unwrap();
    let server = start(&dir, |config| config.quota_bytes = Some(10)).await;
    let addr = server.addr();

    let first = request(addr, "PUT", "/a.bin", &[], b"01234567").await;
    assert_eq!(first.status, 201);
    let full = request(addr, "PUT", "/b.bin", &[], b"01234567").await;
    assert_eq!(full.status, 413);

    let deleted = request(addr, "DELETE", "/a.bin", &[], b"").await;
    assert!(deleted.status == 200 || deleted.status == 204);
    let second = request(addr, "PUT", "/b.bin", &[], b"01234567").await;
    assert_eq!(second.status, 201);
    assert_eq!(fs::read(dir.path().join("b.bin")).unwrap(), b"01234567");

    server.shutdown();
}
