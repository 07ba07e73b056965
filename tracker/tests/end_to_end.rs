//! Send → open → reply, through the real listener and the reply scanner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use mailtrack::reply::{MailboxConnector, MailboxError, MailboxSession};
use mailtrack::web::PIXEL_PNG;
use mailtrack::{
    scan_and_apply, spawn_server, tracking_url, CampaignLog, MailboxCredentials, NewEntry,
    ReplyCorrelator, SendStatus,
};

/// Inbox holding a single message from a@b.com.
struct OneMessageInbox {
    header: String,
}

struct OneMessageSession {
    header: String,
}

#[async_trait]
impl MailboxConnector for OneMessageInbox {
    type Session = OneMessageSession;

    async fn connect(&self, _: &MailboxCredentials) -> Result<OneMessageSession, MailboxError> {
        Ok(OneMessageSession {
            header: self.header.clone(),
        })
    }
}

#[async_trait]
impl MailboxSession for OneMessageSession {
    async fn search_from(&mut self, address: &str) -> Result<Vec<u32>, MailboxError> {
        Ok(if address == "a@b.com" { vec![1] } else { Vec::new() })
    }

    async fn fetch_header(&mut self, _: u32) -> Result<Vec<u8>, MailboxError> {
        Ok(self.header.clone().into_bytes())
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_send_open_reply() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    let log = Arc::new(CampaignLog::open(&path).await.unwrap());

    // Send
    let x = log
        .append(NewEntry::new("a@b.com", "Jean / Votre invitation", SendStatus::Sent))
        .await
        .unwrap();
    let entries = log.query().await;
    assert_eq!(entries, vec![x.clone()]);
    assert!(!entries[0].read && !entries[0].replied);

    // Open
    let server = spawn_server(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::clone(&log))
        .await
        .unwrap();
    let base = format!("http://{}", server.local_addr());

    let response = reqwest::get(tracking_url(&base, x.id)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(&response.bytes().await.unwrap()[..], PIXEL_PNG);

    let entries = log.query().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].read);
    assert!(!entries[0].replied);

    server.shutdown().await.unwrap();

    // Reply
    let inbox = OneMessageInbox {
        header: format!(
            "From: a@b.com\r\nDate: {}\r\nSubject: Re: Votre invitation\r\n\r\n",
            (x.sent_at + ChronoDuration::hours(1)).to_rfc2822()
        ),
    };
    let correlator = ReplyCorrelator::new(inbox, Duration::from_secs(5));
    let credentials = MailboxCredentials {
        host: "imap.example.com".to_string(),
        port: 993,
        user: "me@example.com".to_string(),
        password: "secret".to_string(),
    };

    let flagged = scan_and_apply(&log, &correlator, &credentials).await.unwrap();
    assert_eq!(flagged, 1);

    let entries = log.query().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, x.id);
    assert!(entries[0].read && entries[0].replied);

    // And it all made it to disk
    let reopened = CampaignLog::open(&path).await.unwrap();
    assert_eq!(reopened.query().await, entries);
}

#[tokio::test]
async fn test_unknown_id_over_http_leaves_log_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(
        CampaignLog::open(dir.path().join("history.json"))
            .await
            .unwrap(),
    );
    log.append(NewEntry::new("a@b.com", "", SendStatus::Sent))
        .await
        .unwrap();
    let before = log.query().await;

    let server = spawn_server(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::clone(&log))
        .await
        .unwrap();
    let url = format!("http://{}/track?id=00000000-0000-0000-0000-000000000000", server.local_addr());

    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], PIXEL_PNG);
    assert_eq!(log.query().await, before);

    server.shutdown().await.unwrap();
}
