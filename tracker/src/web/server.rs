//! Tracking listener lifecycle.
//!
//! The listener runs on its own task. Only the owner of the returned
//! [`ServerHandle`] can stop it; there is no route for that.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::campaign::CampaignLog;
use crate::web::handlers::{track, AppState};

/// Build the router. `/track` is the only route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/track", get(track))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle to a running tracking listener.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// Bind `addr` and start serving the tracking endpoint in the background.
///
/// Returns once the socket is bound, so `local_addr()` is immediately usable
/// (handy with port 0 in tests).
pub async fn spawn_server(addr: SocketAddr, log: Arc<CampaignLog>) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind tracking listener on {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read listener address")?;

    let shutdown = CancellationToken::new();
    let app = router(AppState::new(log));
    let signal = shutdown.clone().cancelled_owned();

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
    });

    info!(address = %local_addr, "tracking_server_listening");

    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, let in-flight requests finish, then join.
    pub async fn shutdown(self) -> Result<()> {
        info!(address = %self.local_addr, "tracking_server_shutting_down");
        self.shutdown.cancel();

        self.task
            .await
            .context("Tracking server task panicked")?
            .context("Tracking server error")?;

        info!("tracking_server_stopped");
        Ok(())
    }
}
