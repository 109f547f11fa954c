//! HTTP server hosting the upload pipeline and the WebDAV filesystem.
//!
//! `PUT` requests go to [`handle_put`]; every other method is answered by
//! `dav-server` over [`LocalDavFs`].

use super::put::handle_put;
use super::LocalDavFs;
use crate::config::{ConfigError, ServerConfig};
use crate::hooks::LogSink;
use crate::store::LocalStorage;
use dav_server::body::Body;
use dav_server::{fakels::FakeLs, DavHandler};
use filedav_core::{AccessPolicy, AllowAll, MemoryLockProvider, ReadOnly, UploadHandler};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Everything needed to answer requests for one served directory.
#[derive(Clone)]
pub struct FileDav {
    upload: Arc<UploadHandler>,
    dav: DavHandler,
}

impl FileDav {
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let upload_config = config.upload_config()?;
        let storage =
            Arc::new(LocalStorage::new(config.root.clone()).with_quota(config.quota_bytes));
        let locks = Arc::new(MemoryLockProvider::new());
        let access: Arc<dyn AccessPolicy> = if config.read_only {
            Arc::new(ReadOnly)
        } else {
            Arc::new(AllowAll)
        };

        let fs = LocalDavFs::new(
            storage.clone(),
            locks.clone(),
            upload_config.view.clone(),
            config.read_only,
        );
        let upload = UploadHandler::new(storage, locks)
            .with_sink(Arc::new(LogSink))
            .with_access(access)
            .with_config(upload_config);

        let dav = DavHandler::builder()
            .filesystem(Box::new(fs))
            .locksystem(FakeLs::new()) // Fake locks for macOS/Windows compatibility
            .build_handler();

        Ok(Self {
            upload: Arc::new(upload),
            dav,
        })
    }

    pub fn upload_handler(&self) -> &Arc<UploadHandler> {
        &self.upload
    }

    /// Answers one request.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Body> {
        debug!("{} {}", req.method(), req.uri());
        if req.method() == Method::PUT {
            handle_put(self.upload.clone(), req).await
        } else {
            self.dav.handle(req).await
        }
    }
}

/// Handle to a server started with [`serve_background`].
pub struct FileDavServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FileDavServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn mount_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops accepting connections. Requests in flight run to completion.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Serves `app` on `addr` until the process exits.
///
/// ```ignore
/// use filedav_fs::config::ServerConfig;
/// use filedav_fs::webdav::{serve, FileDav};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::load("filedav.toml")?;
///     serve(FileDav::from_config(&config)?, config.addr()).await?;
///     Ok(())
/// }
/// ```
pub async fn serve(app: FileDav, addr: SocketAddr) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!("WebDAV server listening on http://{}", local_addr);
    info!("Press Ctrl+C to stop the server");

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        debug!("Connection from {}", remote_addr);
        tokio::spawn(serve_connection(app.clone(), stream));
    }
}

/// Starts serving in the background. Pass port 0 to pick a free port.
pub async fn serve_background(app: FileDav, addr: SocketAddr) -> io::Result<FileDavServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    info!("WebDAV server started on http://{}", local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            debug!("Connection from {}", remote_addr);
                            tokio::spawn(serve_connection(app.clone(), stream));
                        }
                        Err(e) => {
                            error!("Accept error: {:?}", e);
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("WebDAV server shutting down");
                    break;
                }
            }
        }
    });

    Ok(FileDavServer {
        addr: local_addr,
        shutdown_tx: Some(shutdown_tx),
    })
}

async fn serve_connection(app: FileDav, stream: TcpStream) {
    let io = TokioIo::new(stream);
    if let Err(err) = http1::Builder::new()
        .serve_connection(
            io,
            service_fn(move |req| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(app.handle(req).await) }
            }),
        )
        .await
    {
        error!("Connection error: {:?}", err);
    }
}
