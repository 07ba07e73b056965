//! Tracking pixel bytes and helpers for embedding the pixel in outgoing mail.

use uuid::Uuid;

/// A 1x1 fully transparent PNG.
pub const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Build the pixel URL for an entry, e.g. `http://192.168.1.15:5000/track?id=<uuid>`.
pub fn tracking_url(base: &str, id: Uuid) -> String {
    format!("{}/track?id={}", base.trim_end_matches('/'), id)
}

/// Invisible `<img>` tag pointing at `url`.
pub(crate) fn pixel_tag(url: &str) -> String {
    format!(r#"<img src="{url}" width="1" height="1" style="display:none;">"#)
}

/// Insert the tracking pixel into an HTML body.
///
/// The tag goes right before the last `</body>` (any case) or is appended when
/// the document has no closing body tag.
pub fn inject_pixel(html: &str, url: &str) -> String {
    let tag = pixel_tag(url);

    // ASCII lowercasing keeps byte offsets intact
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
