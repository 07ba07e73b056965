//! Mailbox access seam used by the reply scanner.
//!
//! `ImapConnector` is the production implementation; tests plug in an
//! in-memory mailbox.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Mailbox login details. Held in memory only.
#[derive(Clone)]
pub struct MailboxCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {host} failed: {message}")]
    Tls { host: String, message: String },

    #[error("login rejected: {0}")]
    Login(String),

    #[error("{command} failed: {message}")]
    Protocol {
        command: &'static str,
        message: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },

    #[error("malformed message header: {0}")]
    Malformed(#[from] mailparse::MailParseError),

    #[error("address cannot be used in a search: {0:?}")]
    InvalidAddress(String),
}

impl MailboxError {
    /// Whether the session can no longer be trusted after this error.
    ///
    /// A timed-out command may still have a response in flight.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            MailboxError::Timeout { .. } | MailboxError::Connect { .. } | MailboxError::Tls { .. }
        )
    }
}

/// Opens authenticated sessions with the inbox selected.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    type Session: MailboxSession + 'static;

    async fn connect(&self, credentials: &MailboxCredentials) -> Result<Self::Session, MailboxError>;
}

/// An open mailbox session.
#[async_trait]
pub trait MailboxSession: Send {
    /// Ids of messages whose sender matches `address`, in any order.
    async fn search_from(&mut self, address: &str) -> Result<Vec<u32>, MailboxError>;

    /// Raw header block of message `id`, without marking it seen.
    async fn fetch_header(&mut self, id: u32) -> Result<Vec<u8>, MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}
