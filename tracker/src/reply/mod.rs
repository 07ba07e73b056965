//! Reply detection.
//!
//! This module provides:
//! - `ReplyCorrelator`, which scans a mailbox for mail from campaign recipients
//! - The `ReplyMatcher` decision seam and the default recency heuristic
//! - The mailbox seam and its IMAP implementation
//! - `ReplyWorker` and `scan_and_apply` for feeding results back into the log
//!
//! ## Flow
//!
//! ```text
//! CampaignLog::query → ReplyCorrelator::scan → ScanReport → CampaignLog::update_flags
//! ```
//!
//! Replies are detected by recency only: any message from the recipient dated
//! after the send counts. Threading headers are not consulted.

pub mod correlator;
pub mod imap;
pub mod mailbox;
pub mod matcher;
pub mod worker;

pub use correlator::{ReplyCorrelator, ScanError, ScanReport};
pub use imap::{ImapConnector, ImapMailbox};
pub use mailbox::{MailboxConnector, MailboxCredentials, MailboxError, MailboxSession};
pub use matcher::{RecencyMatcher, ReplyMatcher};
pub use worker::{apply_report, scan_and_apply, ReplyWorker, WorkerHandle};
