//! Mailtrack - open and reply tracking for individually sent campaign emails.
//!
//! This library provides the pieces the `mailtrack` binary wires together:
//! - `campaign`: the durable log of send attempts and their read/reply flags
//! - `web`: the tracking pixel endpoint that flags entries as read
//! - `reply`: the mailbox scanner that flags entries as replied
//!
//! ## Architecture
//!
//! ```text
//! sender ──append──────────────┐
//! GET /track ──update(read)────┼──> CampaignLog ──> history.json
//! ReplyWorker ──update(replied)┘
//! ```
//!
//! The log is constructed once and shared as `Arc<CampaignLog>`; nothing
//! reaches it through a global.

pub mod campaign;
pub mod config;
pub mod reply;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use campaign::{CampaignEntry, CampaignLog, FlagUpdate, LoadState, NewEntry, SendStatus};
pub use config::Config;
pub use reply::{
    scan_and_apply, ImapConnector, MailboxCredentials, RecencyMatcher, ReplyCorrelator,
    ReplyMatcher, ReplyWorker, ScanReport,
};
pub use web::{inject_pixel, spawn_server, tracking_url, ServerHandle};
