//! SafeChat message synchronization.
//!
//! Merges optimistic local echoes with the authoritative server stream,
//! one channel at a time, and tracks chat warnings and restrictions.

pub mod ledger;
pub mod reconcile;
pub mod store;

pub use ledger::{LedgerConfig, ModerationLedger, WarnOutcome};
pub use reconcile::{DEFAULT_MATCH_WINDOW, ReconcileConfig, merge};
pub use store::{Delivery, MergeSummary, MessageStore};
