//! Publishing Ledger Module
//!
//! Records every publish attempt, whatever the channel and whatever the
//! result, and lets the manual channels attach the resulting post id later.

pub mod ledger;
pub mod links;

pub use ledger::{normalize_text, Channel, LedgerEntry, Outcome, PublishLedger};
pub use links::{extract_post_id, intent_url, post_url};
