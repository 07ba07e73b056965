//! The "is this message a reply" decision.
//!
//! Kept behind a trait so a thread-aware matcher (In-Reply-To/References) can
//! replace the recency heuristic without touching the scanner or the log.

use chrono::{DateTime, Utc};

/// Decides whether a candidate message from the recipient counts as a reply.
pub trait ReplyMatcher: Send + Sync {
    fn is_reply(&self, message_date: DateTime<Utc>, sent_at: DateTime<Utc>) -> bool;
}

/// Any message from the recipient dated strictly after the send counts.
///
/// This is a heuristic. An unrelated new email from the same address that
/// arrives before the real reply is still classified as a reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyMatcher;

impl ReplyMatcher for RecencyMatcher {
    fn is_reply(&self, message_date: DateTime<Utc>, sent_at: DateTime<Utc>) -> bool {
        message_date > sent_at
    }
}
