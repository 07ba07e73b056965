//! IMAP implementation of the mailbox seam (implicit TLS, usually port 993).

use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use super::mailbox::{MailboxConnector, MailboxCredentials, MailboxError, MailboxSession};

type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

/// Connects to an IMAP server and selects a folder.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    folder: String,
}

impl ImapConnector {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new("INBOX")
    }
}

/// A logged-in IMAP session with the folder selected read-write.
pub struct ImapMailbox {
    session: ImapSession,
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    type Session = ImapMailbox;

    async fn connect(&self, credentials: &MailboxCredentials) -> Result<ImapMailbox, MailboxError> {
        let host = credentials.host.as_str();
        info!(host = %host, port = credentials.port, "imap_connecting");

        let tcp = TcpStream::connect((host, credentials.port))
            .await
            .map_err(|e| MailboxError::Connect {
                host: host.to_string(),
                port: credentials.port,
                source: e,
            })?;

        let tls = async_native_tls::TlsConnector::new()
            .connect(host, tcp.compat())
            .await
            .map_err(|e| MailboxError::Tls {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let mut session = async_imap::Client::new(tls)
            .login(&credentials.user, &credentials.password)
            .await
            .map_err(|(e, _)| MailboxError::Login(e.to_string()))?;

        session
            .select(&self.folder)
            .await
            .map_err(|e| protocol("SELECT", e))?;

        debug!(host = %host, folder = %self.folder, "imap_folder_selected");

        Ok(ImapMailbox { session })
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn search_from(&mut self, address: &str) -> Result<Vec<u32>, MailboxError> {
        let query = format!("FROM {}", quote(address)?);
        let ids = self
            .session
            .search(&query)
            .await
            .map_err(|e| protocol("SEARCH", e))?;

        Ok(ids.into_iter().collect())
    }

    async fn fetch_header(&mut self, id: u32) -> Result<Vec<u8>, MailboxError> {
        // PEEK keeps the message unread for the mailbox owner
        let fetches: Vec<_> = self
            .session
            .fetch(id.to_string(), "BODY.PEEK[HEADER]")
            .await
            .map_err(|e| protocol("FETCH", e))?
            .try_collect()
            .await
            .map_err(|e| protocol("FETCH", e))?;

        fetches
            .iter()
            .find_map(|fetch| fetch.header().map(<[u8]>::to_vec))
            .ok_or_else(|| MailboxError::Protocol {
                command: "FETCH",
                message: format!("no header returned for message {id}"),
            })
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        self.session
            .logout()
            .await
            .map_err(|e| protocol("LOGOUT", e))
    }
}

fn protocol(command: &'static str, error: async_imap::error::Error) -> MailboxError {
    MailboxError::Protocol {
        command,
        message: error.to_string(),
    }
}

/// Render an address as an IMAP quoted string.
///
/// Quoted strings cannot carry CR, LF or 8-bit characters, so such addresses
/// are refused rather than sent as a literal.
fn quote(address: &str) -> Result<String, MailboxError> {
    if address.is_empty() || !address.bytes().all(|b| b.is_ascii() && b != b'\r' && b != b'\n') {
        return Err(MailboxError::InvalidAddress(address.to_string()));
    }

    let mut quoted = String::with_capacity(address.len() + 2);
    quoted.push('"');
    for c in address.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');

    Ok(quoted)
}
