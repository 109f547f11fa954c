//! HTTP side of `PUT`: header extraction, body streaming and the response.

use bytes::Bytes;
use dav_server::body::Body;
use dav_server::davpath::DavPath;
use filedav_core::{DavError, Method, PutOutcome, UploadHandler, UploadHeaders, UploadRequest};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use hyper::{Request, Response, StatusCode};
use log::{debug, error};
use std::io::{self, Read};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const OC_CHUNKED: &str = "oc-chunked";
pub const OC_TOTAL_LENGTH: &str = "oc-total-length";
pub const OC_CHECKSUM: &str = "oc-checksum";
pub const OC_ETAG: &str = "oc-etag";
pub const X_OC_MTIME: &str = "x-oc-mtime";
pub const X_OC_CTIME: &str = "x-oc-ctime";

const BODY_CHANNEL_DEPTH: usize = 8;

/// Runs one PUT through the upload pipeline on a blocking worker.
pub async fn handle_put(handler: Arc<UploadHandler>, req: Request<Incoming>) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let path = match DavPath::new(parts.uri.path()) {
        Ok(path) if !path.is_collection() => {
            format!("/{}", path.as_rel_ospath().to_string_lossy())
        }
        Ok(_) => return status_only(StatusCode::METHOD_NOT_ALLOWED),
        Err(err) => {
            debug!("rejecting PUT to {}: {:?}", parts.uri, err);
            return status_only(StatusCode::BAD_REQUEST);
        }
    };
    let headers = upload_headers(&parts.method, &parts.headers);

    let (tx, rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    tokio::spawn(forward_body(body, tx));

    let request = UploadRequest::new(path.clone(), BodyReader::new(rx)).with_headers(headers);
    match tokio::task::spawn_blocking(move || handler.put(request)).await {
        Ok(Ok(outcome)) => success_response(&outcome),
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            error!("PUT {} worker failed: {}", path, err);
            error_response(&DavError::server_error("upload worker failed"))
        }
    }
}

/// Decodes the upload headers. Unparseable lengths count as absent.
pub fn upload_headers(method: &hyper::Method, headers: &HeaderMap) -> UploadHeaders {
    // Opaque bytes still reach the handler so bad timestamps are refused.
    let text = |name: &str| {
        headers
            .get(name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
    };
    let number = |name: &str| text(name).and_then(|value| value.trim().parse::<u64>().ok());

    UploadHeaders {
        method: if method == hyper::Method::PUT {
            Method::Put
        } else {
            Method::Other
        },
        content_length: number(CONTENT_LENGTH.as_str()),
        oc_chunked: headers.contains_key(OC_CHUNKED),
        total_length: number(OC_TOTAL_LENGTH),
        mtime: text(X_OC_MTIME),
        ctime: text(X_OC_CTIME),
        checksum: text(OC_CHECKSUM),
    }
}

async fn forward_body(mut body: Incoming, tx: mpsc::Sender<io::Result<Bytes>>) {
    loop {
        let item = match body.frame().await {
            None => return,
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => Ok(data),
                Err(_) => continue,
            },
            Some(Err(err)) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, err)),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            // The upload stopped reading or the client went away.
            return;
        }
    }
}

/// Blocking [`Read`] over body frames sent from the connection task.
pub struct BodyReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl BodyReader {
    pub fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(data)) => self.current = data,
                Some(Err(err)) => return Err(err),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

fn success_response(outcome: &PutOutcome) -> Response<Body> {
    let Some(result) = outcome.committed() else {
        return status_only(StatusCode::CREATED);
    };
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::NO_CONTENT
    };
    let mut response = status_only(status);
    let headers = response.headers_mut();
    if let Ok(etag) = HeaderValue::from_str(&result.quoted_etag()) {
        headers.insert(ETAG, etag.clone());
        headers.insert(OC_ETAG, etag);
    }
    if result.mtime_accepted {
        headers.insert(X_OC_MTIME, HeaderValue::from_static("accepted"));
    }
    if result.ctime_accepted {
        headers.insert(X_OC_CTIME, HeaderValue::from_static("accepted"));
    }
    if let Some(checksum) = result
        .checksum
        .as_deref()
        .and_then(|checksum| HeaderValue::from_str(checksum).ok())
    {
        headers.insert(OC_CHECKSUM, checksum);
    }
    response
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

pub fn error_response(err: &DavError) -> Response<Body> {
    let mut response = Response::new(Body::from(error_body(err)));
    *response.status_mut() =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    response
}

/// `DAV:error` document naming the outcome.
pub fn error_body(err: &DavError) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    body.push_str("<d:error xmlns:d=\"DAV:\" xmlns:s=\"http://sabredav.org/ns\">\n");
    body.push_str(&format!("  <s:exception>{}</s:exception>\n", err.name()));
    body.push_str(&format!(
        "  <s:message>{}</s:message>\n",
        escape_xml(err.message())
    ));
    if let DavError::Forbidden { retry, .. } = err {
        body.push_str(&format!("  <s:retry>{}</s:retry>\n", retry));
    }
    body.push_str("</d:error>\n");
    body
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedav_core::{ForbiddenKind, StorageError};

    #[test]
    fn headers_are_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(OC_CHUNKED, HeaderValue::from_static("1"));
        headers.insert(OC_TOTAL_LENGTH, HeaderValue::from_static("not a number"));
        headers.insert(X_OC_MTIME, HeaderValue::from_static("1700000000"));
        let decoded = upload_headers(&hyper::Method::PUT, &headers);
        assert_eq!(decoded.method, Method::Put);
        assert_eq!(decoded.content_length, Some(12));
        assert!(decoded.oc_chunked);
        assert_eq!(decoded.total_length, None);
        assert_eq!(decoded.mtime.as_deref(), Some("1700000000"));
        assert_eq!(decoded.ctime, None);

        let mut headers = HeaderMap::new();
        headers.insert(X_OC_MTIME, HeaderValue::from_bytes(&[0xff, b'1']).unwrap());
        headers.insert(X_OC_CTIME, HeaderValue::from_static(""));
        let decoded = upload_headers(&hyper::Method::PUT, &headers);
        assert_eq!(decoded.mtime.as_deref(), Some("\u{FFFD}1"));
        assert_eq!(decoded.ctime.as_deref(), Some(""));

        let decoded = upload_headers(&hyper::Method::POST, &HeaderMap::new());
        assert_eq!(decoded.method, Method::Other);
        assert!(!decoded.oc_chunked);
    }

    #[test]
    fn error_body_escapes_and_carries_retry() {
        let err = DavError::from(StorageError::Forbidden {
            message: "<scan> & wait".to_string(),
            retry: true,
        });
        let body = error_body(&err);
        assert!(body.contains("<s:exception>Forbidden</s:exception>"));
        assert!(body.contains("&lt;scan&gt; &amp; wait"));
        assert!(body.contains("<s:retry>true</s:retry>"));

        let err = DavError::forbidden(ForbiddenKind::Permission, "nope");
        assert!(error_body(&err).contains("<s:retry>false</s:retry>"));
        assert_eq!(error_response(&err).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn body_reader_drains_frames_in_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(Bytes::from_static(b"hello "))).unwrap();
        tx.try_send(Ok(Bytes::from_static(b"world"))).unwrap();
        drop(tx);
        let mut text = String::new();
        BodyReader::new(rx).read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");
    }
}
