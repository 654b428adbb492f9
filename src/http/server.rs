//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::handlers::{router, AppState};
use crate::error::{ProxyError, Result};
use crate::fetch::Origin;
use crate::weather::WeatherReport;

/// HTTP server for the weather API.
pub struct HttpServer<O: Origin + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// Handler state
    state: AppState<O>,
}

impl<O> HttpServer<O>
where
    O: Origin<Value = WeatherReport> + 'static,
{
    pub fn new(addr: SocketAddr, state: AppState<O>) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            ProxyError::Io(e)
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server for weather API");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ProxyError::Io(e)
        })
    }
}
