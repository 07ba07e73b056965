//! Web server module for the tracking pixel.
//!
//! This module provides a single, always-successful endpoint:
//! - `GET /track?id=<uuid>` serves a transparent 1x1 PNG
//! - As a side effect the matching campaign entry is flagged as read
//!
//! Plus helpers to embed the pixel in outgoing HTML.

pub mod handlers;
pub mod pixel;
pub mod server;

pub use handlers::{pixel_response, track, AppState};
pub use pixel::{inject_pixel, tracking_url, PIXEL_PNG};
pub use server::{router, spawn_server, ServerHandle};
