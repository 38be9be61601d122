//! Store seams the dispatcher talks to.
//! The SQLite implementation lives in [`crate::persistence`].

use chrono::{DateTime, Utc};
use flussu_core::Result;

use crate::record::WorkRecord;

/// Outcome of the conditional claim update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller flipped `enabled` from true to false.
    Claimed,
    /// The record was already disabled; someone else owns it.
    AlreadyClaimed,
}

/// Persistent table of scheduled calls.
pub trait WorkStore: Send + Sync {
    /// Records whose `enabled` flag equals `only_enabled`, in storage order.
    /// Due-time filtering is left to the caller.
    fn select_due(&self, only_enabled: bool) -> Result<Vec<WorkRecord>>;

    /// Atomically disable the record if it is still enabled.
    fn claim(&self, sequence_id: i64) -> Result<ClaimOutcome>;

    /// Write the dispatch outcome.
    fn record_result(&self, sequence_id: i64, result: &str) -> Result<()>;
}

/// Read-only view over workflow sessions.
pub trait SessionLookup: Send + Sync {
    fn is_expired(&self, session_ref: &str, now: DateTime<Utc>) -> Result<bool>;
}
