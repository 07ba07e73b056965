//! Mailtrack - tracking pixel server and reply scanner.
//!
//! This binary:
//! - Opens the campaign history
//! - Serves `GET /track` on all interfaces
//! - Scans the configured mailbox for replies periodically, and on SIGHUP
//! - Stops both cleanly on SIGINT/SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use mailtrack::reply::WorkerHandle;
use mailtrack::util::logging;
use mailtrack::{
    spawn_server, CampaignLog, Config, ImapConnector, LoadState, ReplyCorrelator, ReplyWorker,
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    info!("tracker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        history_path = %config.history_path.display(),
        port = config.port,
        public_base_url = %config.public_base_url(),
        reply_scans_configured = config.mailbox_credentials().is_some(),
        reply_scan_interval_secs = config.reply_scan_interval_secs,
        "config_loaded"
    );

    let log = CampaignLog::open(&config.history_path)
        .await
        .context("Failed to open campaign log")?;

    if let LoadState::Recovered { quarantined, reason } = log.load_state() {
        warn!(
            history_path = %log.path().display(),
            quarantined = %quarantined.display(),
            reason = %reason,
            "tracker_started_with_empty_history"
        );
    }

    let log = Arc::new(log);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = spawn_server(addr, Arc::clone(&log)).await?;

    let worker = match config.mailbox_credentials() {
        Some(credentials) => {
            let correlator = Arc::new(ReplyCorrelator::new(
                ImapConnector::default(),
                config.imap_timeout(),
            ));
            let worker = ReplyWorker::new(
                Arc::clone(&log),
                correlator,
                credentials,
                config.reply_scan_interval(),
            );
            Some(worker.spawn())
        }
        None => {
            info!("reply_scans_disabled");
            None
        }
    };

    wait_for_shutdown(worker.as_ref()).await;

    if let Some(worker) = worker {
        worker.shutdown().await?;
    }
    server.shutdown().await?;

    info!("tracker_shutdown_complete");

    Ok(())
}

/// Wait for SIGINT/SIGTERM. SIGHUP triggers an immediate reply scan.
async fn wait_for_shutdown(worker: Option<&WorkerHandle>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(unix)]
    let rescan = async {
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
            .expect("Failed to install SIGHUP handler");
        while hangup.recv().await.is_some() {
            match worker {
                Some(worker) => {
                    info!("Received SIGHUP");
                    worker.trigger();
                }
                None => warn!("Received SIGHUP but reply scans are disabled"),
            }
        }
    };

    #[cfg(not(unix))]
    let rescan = {
        let _ = worker;
        std::future::pending::<()>()
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
        _ = rescan => {}
    }

    info!("tracker_shutting_down");
}
