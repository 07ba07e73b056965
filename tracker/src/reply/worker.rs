//! Applying scan results to the log, periodically or on demand.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::correlator::{ReplyCorrelator, ScanError, ScanReport};
use super::mailbox::{MailboxConnector, MailboxCredentials};
use super::matcher::ReplyMatcher;
use crate::campaign::{CampaignLog, FlagUpdate};

/// Query the log, scan the mailbox and flag every detected reply.
///
/// Returns how many entries were flagged.
pub async fn scan_and_apply<C, M>(
    log: &CampaignLog,
    correlator: &ReplyCorrelator<C, M>,
    credentials: &MailboxCredentials,
) -> Result<usize, ScanError>
where
    C: MailboxConnector,
    M: ReplyMatcher,
{
    let entries = log.query().await;
    let report = correlator.scan(credentials, &entries).await?;
    Ok(apply_report(log, &report).await)
}

/// Flag every entry in `report` as replied. Storage errors are logged and
/// skipped.
pub async fn apply_report(log: &CampaignLog, report: &ScanReport) -> usize {
    let mut flagged = 0;

    for id in &report.replied {
        match log.update_flags(*id, FlagUpdate::replied()).await {
            Ok(true) => flagged += 1,
            Ok(false) => warn!(id = %id, "reply_entry_not_found"),
            Err(e) => error!(id = %id, error = %e, "reply_flag_update_failed"),
        }
    }

    flagged
}

/// Background reply scanner.
pub struct ReplyWorker<C, M> {
    log: Arc<CampaignLog>,
    correlator: Arc<ReplyCorrelator<C, M>>,
    credentials: MailboxCredentials,
    every: Option<Duration>,
}

/// Handle to a running [`ReplyWorker`].
pub struct WorkerHandle {
    shutdown: CancellationToken,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<C, M> ReplyWorker<C, M>
where
    C: MailboxConnector + 'static,
    M: ReplyMatcher + 'static,
{
    /// `every` of `None` disables periodic scans; scans then only run when
    /// triggered through the handle.
    pub fn new(
        log: Arc<CampaignLog>,
        correlator: Arc<ReplyCorrelator<C, M>>,
        credentials: MailboxCredentials,
        every: Option<Duration>,
    ) -> Self {
        Self {
            log,
            correlator,
            credentials,
            every,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let trigger = Arc::new(Notify::new());

        let task = tokio::spawn(self.run(shutdown.clone(), Arc::clone(&trigger)));

        WorkerHandle {
            shutdown,
            trigger,
            task,
        }
    }

    async fn run(self, shutdown: CancellationToken, trigger: Arc<Notify>) {
        let mut ticker = self.every.map(|every| {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(
            interval_secs = ?self.every.map(|d| d.as_secs()),
            "reply_worker_started"
        );

        loop {
            let next_tick = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = next_tick => {}
                _ = trigger.notified() => info!("reply_scan_triggered"),
            }

            let entries = self.log.query().await;

            // Abandoning a scan is safe; applying its results is not interrupted
            let report = tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.correlator.scan(&self.credentials, &entries) => report,
            };

            match report {
                Ok(report) => {
                    let flagged = apply_report(&self.log, &report).await;
                    info!(flagged = flagged, "reply_worker_scan_applied");
                }
                Err(ScanError::InProgress) => {}
                Err(e) => error!(error = %e, "reply_worker_scan_failed"),
            }
        }

        info!("reply_worker_stopped");
    }
}

impl WorkerHandle {
    /// Ask for a scan now. Coalesces with a pending request.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the worker, abandoning a scan in progress, and join it.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.context("Reply worker task panicked")
    }
}
