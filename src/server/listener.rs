//! HTTP server listener
//!
//! Binds the configured address and serves the router until shut down.
//! On shutdown every live session is cancelled so streaming responses end
//! and the graceful drain can complete.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::annotate::Annotate;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::routes::build_router;
use crate::server::state::AppState;

/// framecast HTTP server
pub struct FramecastServer {
    state: AppState,
}

impl FramecastServer {
    /// Create a server with production readers, WebRTC and ffmpeg
    pub fn new(config: ServerConfig, annotator: Arc<dyn Annotate>) -> Result<Self> {
        Ok(Self::with_state(AppState::new(config, annotator)?))
    }

    /// Create a server around prepared state
    pub fn with_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.state.registry()
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_addr;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        tracing::info!(
            addr = %local,
            max_sessions = self.state.config.max_sessions,
            sharing = ?self.state.config.sharing,
            "framecast listening"
        );

        let registry = Arc::clone(self.registry());
        let signal = async move {
            shutdown.await;
            tracing::info!(sessions = registry.session_count(), "Shutdown signal received");
            registry.cancel_all();
        };

        let app = build_router(self.state.clone());
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}
