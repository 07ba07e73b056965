//! Reply scanning.
//!
//! For every entry still waiting for a reply the scanner searches the inbox
//! for mail from the recipient and walks the candidates newest first, asking
//! the [`ReplyMatcher`] whether any of them counts as a reply.
//!
//! Failure policy:
//! - cannot connect or log in: the whole scan fails, nothing is reported
//! - one entry fails to search or fetch: logged, counted, scan goes on
//! - logout fails: logged only

use std::time::Duration;

use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::mailbox::{MailboxConnector, MailboxCredentials, MailboxError, MailboxSession};
use super::matcher::{RecencyMatcher, ReplyMatcher};
use crate::campaign::CampaignEntry;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("mailbox connection failed: {0}")]
    Connect(#[source] MailboxError),

    #[error("a reply scan is already running")]
    InProgress,
}

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries that were waiting for a reply
    pub eligible: usize,
    /// Entries found to have been replied to
    pub replied: Vec<Uuid>,
    /// Entries skipped because searching or fetching failed
    pub entry_failures: usize,
}

/// Correlates inbound mail with sent campaign entries.
///
/// At most one scan runs at a time per correlator; a second concurrent call
/// gets [`ScanError::InProgress`].
pub struct ReplyCorrelator<C, M = RecencyMatcher> {
    connector: C,
    matcher: M,
    call_timeout: Duration,
    running: Mutex<()>,
}

impl<C: MailboxConnector> ReplyCorrelator<C> {
    /// Correlator using the recency heuristic.
    pub fn new(connector: C, call_timeout: Duration) -> Self {
        Self::with_matcher(connector, RecencyMatcher, call_timeout)
    }
}

impl<C: MailboxConnector, M: ReplyMatcher> ReplyCorrelator<C, M> {
    pub fn with_matcher(connector: C, matcher: M, call_timeout: Duration) -> Self {
        Self {
            connector,
            matcher,
            call_timeout,
            running: Mutex::new(()),
        }
    }

    /// Scan the mailbox for replies to `entries`.
    ///
    /// Only entries with status `Sent` and no reply yet are looked at. The
    /// caller applies the returned ids to the log.
    ///
    /// A failed connect or login yields `Err(ScanError::Connect)` rather than
    /// an empty report, so callers can tell "no replies" from "never looked".
    /// Either way nothing is flagged.
    pub async fn scan(
        &self,
        credentials: &MailboxCredentials,
        entries: &[CampaignEntry],
    ) -> Result<ScanReport, ScanError> {
        let Ok(_running) = self.running.try_lock() else {
            warn!(host = %credentials.host, "reply_scan_rejected_in_progress");
            return Err(ScanError::InProgress);
        };

        let eligible: Vec<&CampaignEntry> = entries.iter().filter(|e| e.awaits_reply()).collect();
        let mut report = ScanReport {
            eligible: eligible.len(),
            ..Default::default()
        };

        info!(
            host = %credentials.host,
            total_entries = entries.len(),
            eligible = report.eligible,
            "reply_scan_starting"
        );

        if eligible.is_empty() {
            info!("reply_scan_nothing_to_check");
            return Ok(report);
        }

        let mut session = Some(self.connect(credentials).await.map_err(|e| {
            error!(host = %credentials.host, error = %e, "mailbox_connect_failed");
            ScanError::Connect(e)
        })?);

        for (position, entry) in eligible.iter().enumerate() {
            let Some(active) = session.as_mut() else {
                warn!(
                    unchecked = report.eligible - position,
                    "reply_scan_stopped_without_session"
                );
                break;
            };

            match self.check_entry(active, entry).await {
                Ok(true) => report.replied.push(entry.id),
                Ok(false) => {}
                Err(e) => {
                    report.entry_failures += 1;
                    warn!(
                        id = %entry.id,
                        recipient = %entry.recipient,
                        error = %e,
                        "reply_entry_scan_failed"
                    );

                    if e.poisons_session() {
                        session = match self.connect(credentials).await {
                            Ok(fresh) => Some(fresh),
                            Err(e) => {
                                error!(host = %credentials.host, error = %e, "mailbox_reconnect_failed");
                                None
                            }
                        };
                    }
                }
            }
        }

        if let Some(mut active) = session {
            if let Err(e) = self.call("LOGOUT", active.logout()).await {
                debug!(error = %e, "mailbox_logout_failed");
            }
        }

        info!(
            eligible = report.eligible,
            replied = report.replied.len(),
            entry_failures = report.entry_failures,
            "reply_scan_complete"
        );

        Ok(report)
    }

    async fn connect(&self, credentials: &MailboxCredentials) -> Result<C::Session, MailboxError> {
        self.call("CONNECT", self.connector.connect(credentials)).await
    }

    /// Whether any message from the entry's recipient counts as a reply.
    async fn check_entry(
        &self,
        session: &mut C::Session,
        entry: &CampaignEntry,
    ) -> Result<bool, MailboxError> {
        let mut ids = self.call("SEARCH", session.search_from(&entry.recipient)).await?;
        if ids.is_empty() {
            return Ok(false);
        }

        // Higher sequence numbers are newer
        ids.sort_unstable_by(|a, b| b.cmp(a));

        for id in ids {
            let raw = self.call("FETCH", session.fetch_header(id)).await?;
            let candidate = Candidate::parse(&raw)?;

            if !candidate.is_from(&entry.recipient) {
                debug!(id = %entry.id, message = id, "reply_candidate_sender_mismatch");
                continue;
            }

            let Some(date) = candidate.date else {
                debug!(id = %entry.id, message = id, "reply_candidate_without_date");
                continue;
            };

            if self.matcher.is_reply(date, entry.sent_at) {
                info!(
                    id = %entry.id,
                    recipient = %entry.recipient,
                    sent_at = %entry.sent_at,
                    reply_date = %date,
                    "reply_detected"
                );
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn call<T>(
        &self,
        command: &'static str,
        future: impl std::future::Future<Output = Result<T, MailboxError>>,
    ) -> Result<T, MailboxError> {
        tokio::time::timeout(self.call_timeout, future)
            .await
            .map_err(|_| MailboxError::Timeout {
                command,
                timeout: self.call_timeout,
            })?
    }
}

/// The header fields the scanner cares about.
struct Candidate {
    senders: Vec<String>,
    date: Option<DateTime<Utc>>,
}

impl Candidate {
    fn parse(raw: &[u8]) -> Result<Self, MailboxError> {
        let (headers, _) = mailparse::parse_headers(raw)?;

        let date = headers
            .get_first_value("Date")
            .and_then(|value| mailparse::dateparse(&value).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        let senders = match headers.get_first_header("From") {
            Some(header) => mailparse::addrparse_header(header)?
                .iter()
                .flat_map(|addr| match addr {
                    MailAddr::Single(single) => vec![single.addr.clone()],
                    MailAddr::Group(group) => group.addrs.iter().map(|a| a.addr.clone()).collect(),
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(Self { senders, date })
    }

    /// IMAP `SEARCH FROM` is a substring match; require the exact address.
    fn is_from(&self, address: &str) -> bool {
        self.senders
            .iter()
            .any(|sender| sender.trim().eq_ignore_ascii_case(address.trim()))
    }
}
