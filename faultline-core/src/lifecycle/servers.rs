//! RPC and HTTP server resources
//!
//! Opening a server binds its listener, so an address conflict surfaces as an
//! acquisition failure. Serving starts later, once the caller has assembled
//! its routes; closing signals graceful shutdown and waits for the serve task.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;

use super::{Resource, ResourceFactory};
use crate::config::FaultlineConfig;
use crate::error::{FaultError, FaultResult};

type ServeTask = JoinHandle<FaultResult<()>>;

async fn bind(resource: &str, host: &str, port: u16) -> FaultResult<TcpListener> {
    let address = format!("{}:{}", host, port);
    TcpListener::bind(&address)
        .await
        .map_err(|e| FaultError::resource(resource, format!("Failed to bind to {}: {}", address, e)))
}

/// Stop the serve task behind `shutdown` and surface its outcome.
async fn stop(name: &str, shutdown: &CancellationToken, task: Option<ServeTask>) -> FaultResult<()> {
    shutdown.cancel();
    match task {
        Some(task) => {
            task.await??;
            tracing::info!(server = name, "Server stopped");
            Ok(())
        }
        None => Ok(()),
    }
}

/// tonic server bound to its listener.
pub struct RpcServer {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
    task: Mutex<Option<ServeTask>>,
}

impl RpcServer {
    pub fn new(listener: TcpListener) -> FaultResult<Self> {
        Ok(Self {
            local_addr: listener.local_addr()?,
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_serving(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Serve `routes` in the background until the server is closed.
    pub fn start(&self, routes: tonic::service::Routes) -> FaultResult<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| FaultError::resource("rpc-server", "Server already started"))?;
        let shutdown = self.shutdown.clone();
        let addr = self.local_addr;

        tracing::info!(%addr, "Starting gRPC server");
        let task = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_routes(routes)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled_owned())
                .await
                .map_err(|e| FaultError::resource("rpc-server", format!("gRPC server error: {}", e)))
        });
        *self.task.lock() = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Resource for RpcServer {
    fn name(&self) -> &str {
        "rpc-server"
    }

    async fn close(&self) -> FaultResult<()> {
        let task = self.task.lock().take();
        self.listener.lock().take();
        stop(self.name(), &self.shutdown, task).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RpcServerFactory;

#[async_trait]
impl ResourceFactory<RpcServer> for RpcServerFactory {
    async fn open(&self, config: &FaultlineConfig) -> FaultResult<Arc<RpcServer>> {
        let listener = bind("rpc-server", &config.rpc.host, config.rpc.port).await?;
        Ok(Arc::new(RpcServer::new(listener)?))
    }
}

/// axum server bound to its listener.
pub struct HttpServer {
    local_addr: SocketAddr,
    base_path: String,
    listener: Mutex<Option<TcpListener>>,
    shutdown: CancellationToken,
    task: Mutex<Option<ServeTask>>,
}

impl HttpServer {
    pub fn new(listener: TcpListener, base_path: impl Into<String>) -> FaultResult<Self> {
        Ok(Self {
            local_addr: listener.local_addr()?,
            base_path: base_path.into(),
            listener: Mutex::new(Some(listener)),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_serving(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Serve `router` under the configured base path until closed.
    pub fn start(&self, router: axum::Router) -> FaultResult<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| FaultError::resource("http-server", "Server already started"))?;
        let router = match self.base_path.trim_end_matches('/') {
            "" => router,
            base => axum::Router::new().nest(base, router),
        };
        let shutdown = self.shutdown.clone();

        tracing::info!(addr = %self.local_addr, base_path = %self.base_path, "Starting HTTP server");
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(|e| FaultError::resource("http-server", format!("HTTP server error: {}", e)))
        });
        *self.task.lock() = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Resource for HttpServer {
    fn name(&self) -> &str {
        "http-server"
    }

    async fn close(&self) -> FaultResult<()> {
        let task = self.task.lock().take();
        self.listener.lock().take();
        stop(self.name(), &self.shutdown, task).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpServerFactory;

#[async_trait]
impl ResourceFactory<HttpServer> for HttpServerFactory {
    async fn open(&self, config: &FaultlineConfig) -> FaultResult<Arc<HttpServer>> {
        let listener = bind("http-server", &config.http.host, config.http.port).await?;
        Ok(Arc::new(HttpServer::new(listener, &config.http.base_path)?))
    }
}
