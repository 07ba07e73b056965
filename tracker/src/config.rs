//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables. Mailbox credentials are
//! kept in memory only and never written anywhere.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::reply::MailboxCredentials;
use crate::util::net::local_ip;

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Location of the persisted campaign history
    pub history_path: PathBuf,

    /// Port for the tracking listener (bound on all interfaces)
    pub port: u16,

    /// Base URL recipients reach the tracker on; defaults to the LAN address
    pub public_url: Option<Url>,

    // =========================================================================
    // Reply scanning
    // =========================================================================

    /// IMAP host; reply scanning is disabled when unset
    pub imap_host: Option<String>,

    /// IMAP port (implicit TLS)
    pub imap_port: u16,

    pub imap_user: Option<String>,

    pub imap_password: Option<String>,

    /// Timeout in milliseconds for each mailbox network call
    pub imap_timeout_ms: u64,

    /// Seconds between periodic reply scans; 0 disables them
    pub reply_scan_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            history_path: env::var("MAILTRACK_HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("history.json")),

            port: parse_or("PORT", 5000),

            public_url: non_empty("MAILTRACK_PUBLIC_URL").and_then(|raw| match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(env_var = "MAILTRACK_PUBLIC_URL", value = %raw, error = %e, "Invalid URL, using local address");
                    None
                }
            }),

            imap_host: non_empty("IMAP_HOST"),

            imap_port: parse_or("IMAP_PORT", 993),

            imap_user: non_empty("IMAP_USER"),

            imap_password: non_empty("IMAP_PASSWORD"),

            imap_timeout_ms: parse_or("IMAP_TIMEOUT_MS", 30_000),

            reply_scan_interval_secs: parse_or("REPLY_SCAN_INTERVAL_SECS", 300),
        }
    }

    /// Mailbox credentials, if host, user and password are all configured.
    pub fn mailbox_credentials(&self) -> Option<MailboxCredentials> {
        Some(MailboxCredentials {
            host: self.imap_host.clone()?,
            port: self.imap_port,
            user: self.imap_user.clone()?,
            password: self.imap_password.clone()?,
        })
    }

    pub fn imap_timeout(&self) -> Duration {
        Duration::from_millis(self.imap_timeout_ms)
    }

    pub fn reply_scan_interval(&self) -> Option<Duration> {
        (self.reply_scan_interval_secs > 0).then(|| Duration::from_secs(self.reply_scan_interval_secs))
    }

    /// Base URL to embed in tracking pixels.
    pub fn public_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", local_ip(), self.port),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("history_path", &self.history_path)
            .field("port", &self.port)
            .field("public_url", &self.public_url.as_ref().map(Url::as_str))
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("imap_user", &self.imap_user)
            .field("imap_password", &self.imap_password.as_ref().map(|_| "<redacted>"))
            .field("imap_timeout_ms", &self.imap_timeout_ms)
            .field("reply_scan_interval_secs", &self.reply_scan_interval_secs)
            .finish()
    }
}

/// Parse a variable, falling back to `default` when unset or malformed.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }
    }
}

/// A variable's value, treating blank as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
