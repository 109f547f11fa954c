use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Put,
    /// Any other method routed to the upload path (e.g. `POST` from a form).
    Other,
}

/// Upload-relevant request headers, already decoded by the protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadHeaders {
    pub method: Method,
    /// `Content-Length`, when present and numeric.
    pub content_length: Option<u64>,
    /// `OC-Chunked` marker.
    pub oc_chunked: bool,
    /// `OC-Total-Length` of a chunked transfer.
    pub total_length: Option<u64>,
    /// Raw `X-OC-MTime`.
    pub mtime: Option<String>,
    /// Raw `X-OC-CTime`.
    pub ctime: Option<String>,
    /// Raw `OC-Checksum`, e.g. `SHA1:0beec7b5...`.
    pub checksum: Option<String>,
}

/// One PUT: a view-relative target path and the bytes to store there.
pub struct UploadRequest {
    pub path: String,
    pub body: Box<dyn Read + Send>,
    pub headers: UploadHeaders,
}

impl UploadRequest {
    pub fn new(path: impl Into<String>, body: impl Read + Send + 'static) -> Self {
        Self {
            path: path.into(),
            body: Box::new(body),
            headers: UploadHeaders::default(),
        }
    }

    pub fn with_headers(mut self, headers: UploadHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.headers.method = method;
        self
    }

    pub fn content_length(mut self, length: u64) -> Self {
        self.headers.content_length = Some(length);
        self
    }

    pub fn chunked(mut self) -> Self {
        self.headers.oc_chunked = true;
        self
    }

    pub fn total_length(mut self, length: u64) -> Self {
        self.headers.total_length = Some(length);
        self
    }

    pub fn mtime(mut self, raw: impl Into<String>) -> Self {
        self.headers.mtime = Some(raw.into());
        self
    }

    pub fn ctime(mut self, raw: impl Into<String>) -> Self {
        self.headers.ctime = Some(raw.into());
        self
    }

    pub fn checksum(mut self, raw: impl Into<String>) -> Self {
        self.headers.checksum = Some(raw.into());
        self
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("path", &self.path)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
