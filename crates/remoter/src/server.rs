//! HTTP front end for an [`InstanceRegistry`].
//!
//! Provides an Axum router for the seven protocol routes and a small wrapper to
//! bind and serve it.

mod handlers;

pub use handlers::router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::registry::InstanceRegistry;

/// Serves a registry over HTTP.
#[derive(Clone)]
pub struct TransportServer {
    registry: Arc<InstanceRegistry>,
}

impl TransportServer {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn router(&self) -> axum::Router {
        router(self.registry.clone())
    }

    /// Binds the configured address.
    pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
        TcpListener::bind(config.bind_addr()).await
    }

    /// Serves on `listener` until the process ends.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?addr, "serving sessions");
        axum::serve(listener, self.router()).await
    }
}
