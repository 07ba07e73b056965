//! Persisted record types for the campaign log.
//!
//! Field names on disk are `date`, `email`, `variable`, `uuid`, `status`,
//! `read` and `replied`, in that order.

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a send attempt, fixed when the entry is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendStatus {
    /// The transport accepted the message
    #[serde(alias = "Envoyé")]
    Sent,
    /// The transport reported an error
    #[serde(alias = "Échec")]
    Failed,
    /// Prepared but not handed to a transport
    #[serde(alias = "Brouillon")]
    Draft,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "Sent",
            SendStatus::Failed => "Failed",
            SendStatus::Draft => "Draft",
        }
    }
}

/// One send attempt and its read/reply state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignEntry {
    /// When the entry was created; the reference point for reply detection
    #[serde(rename = "date", with = "timestamp")]
    pub sent_at: DateTime<Utc>,
    /// Recipient email address
    #[serde(rename = "email")]
    pub recipient: String,
    /// Display-only label (variables summary, subject)
    #[serde(rename = "variable", default)]
    pub metadata: String,
    /// Tracking pixel correlation key
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub status: SendStatus,
    /// Set once the tracking pixel has been requested
    #[serde(default)]
    pub read: bool,
    /// Set once the reply scanner found newer mail from the recipient
    #[serde(default)]
    pub replied: bool,
}

impl CampaignEntry {
    /// Whether the reply scanner should look at this entry.
    pub fn awaits_reply(&self) -> bool {
        self.status == SendStatus::Sent && !self.replied
    }

    /// Apply a flag update, returning whether anything changed.
    ///
    /// Flags only move from `false` to `true`; a request for `false` is ignored.
    pub(crate) fn apply(&mut self, update: FlagUpdate) -> bool {
        let mut changed = false;

        if update.read == Some(true) && !self.read {
            self.read = true;
            changed = true;
        }

        if update.replied == Some(true) && !self.replied {
            self.replied = true;
            changed = true;
        }

        changed
    }
}

/// A send attempt about to be recorded.
///
/// The id is minted up front so it can be embedded in the outgoing message
/// before the send happens.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub id: Uuid,
    pub recipient: String,
    pub metadata: String,
    pub status: SendStatus,
}

impl NewEntry {
    /// Create a new entry with a freshly generated id.
    pub fn new(recipient: impl Into<String>, metadata: impl Into<String>, status: SendStatus) -> Self {
        Self::with_id(Uuid::new_v4(), recipient, metadata, status)
    }

    /// Create a new entry with an id the caller already generated.
    pub fn with_id(
        id: Uuid,
        recipient: impl Into<String>,
        metadata: impl Into<String>,
        status: SendStatus,
    ) -> Self {
        Self {
            id,
            recipient: recipient.into(),
            metadata: metadata.into(),
            status,
        }
    }

    pub(crate) fn into_entry(self, sent_at: DateTime<Utc>) -> CampaignEntry {
        CampaignEntry {
            sent_at,
            recipient: self.recipient,
            metadata: self.metadata,
            id: self.id,
            status: self.status,
            read: false,
            replied: false,
        }
    }
}

/// Flags to raise on an existing entry. `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub read: Option<bool>,
    pub replied: Option<bool>,
}

impl FlagUpdate {
    /// Mark the entry as opened.
    pub fn read() -> Self {
        Self {
            read: Some(true),
            replied: None,
        }
    }

    /// Mark the entry as replied to.
    pub fn replied() -> Self {
        Self {
            read: None,
            replied: Some(true),
        }
    }
}

/// Parse an ISO-8601 timestamp.
///
/// RFC 3339 values keep their offset. Values without an offset are taken as
/// local time, which is how older history files were written.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{parse_timestamp, SecondsFormat};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
