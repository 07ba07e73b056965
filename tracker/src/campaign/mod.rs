//! Campaign log: the durable record of every send attempt and its read/reply state.
//!
//! This module provides:
//! - `CampaignEntry` and friends, the persisted record types
//! - `CampaignLog`, the single owner of the on-disk history file
//!
//! ## Sharing
//!
//! ```text
//! foreground sender ──append──┐
//! tracking handlers ──update──┼──> CampaignLog (one async mutex) ──> history.json
//! reply worker ──query/update─┘
//! ```
//!
//! Nothing else touches the history file. Hand an `Arc<CampaignLog>` to every
//! component that needs it.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{CampaignEntry, FlagUpdate, NewEntry, SendStatus};
pub use error::StorageError;
pub use store::{CampaignLog, LoadState};
