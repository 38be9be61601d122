//! Work records — the scheduled calls the dispatcher fires.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRecord {
    /// Store-assigned key, used for claim and result updates.
    pub sequence_id: i64,
    /// Baseline the delay is measured from.
    pub scheduled_at: DateTime<Utc>,
    pub delay_minutes: i64,
    /// Existing conversation to resume. Wins over `workflow_ref`.
    pub session_ref: Option<String>,
    /// Workflow to start fresh.
    pub workflow_ref: Option<String>,
    pub block_ref: Option<String>,
    /// Opaque query data appended to the call URI.
    pub extra_data: Option<String>,
    pub enabled: bool,
    pub result: Option<String>,
}

impl WorkRecord {
    /// When the record becomes eligible. Always derived, never stored.
    ///
    /// `None` when the delay lands outside the representable time range.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        offset_minutes(self.scheduled_at, self.delay_minutes)
    }

    /// Check if this record should fire at `now`. A record without a
    /// representable due time is never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at().is_some_and(|due| now >= due)
    }
}

/// Producer-side payload for scheduling a new call.
#[derive(Debug, Clone, Default)]
pub struct NewWorkRecord {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub delay_minutes: i64,
    pub session_ref: Option<String>,
    pub workflow_ref: Option<String>,
    pub block_ref: Option<String>,
    pub extra_data: Option<String>,
}

impl NewWorkRecord {
    /// A call that starts `workflow_ref` after `delay_minutes`.
    pub fn for_workflow(workflow_ref: &str, delay_minutes: i64) -> Self {
        Self {
            workflow_ref: Some(workflow_ref.to_string()),
            delay_minutes,
            ..Default::default()
        }
    }

    /// A call that resumes `session_ref` after `delay_minutes`.
    pub fn for_session(session_ref: &str, delay_minutes: i64) -> Self {
        Self {
            session_ref: Some(session_ref.to_string()),
            delay_minutes,
            ..Default::default()
        }
    }

    pub fn at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn block(mut self, block_ref: &str) -> Self {
        self.block_ref = Some(block_ref.to_string());
        self
    }

    pub fn data(mut self, extra_data: &str) -> Self {
        self.extra_data = Some(extra_data.to_string());
        self
    }
}

/// `at` shifted by `minutes`, or `None` on overflow.
pub fn offset_minutes(at: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_minutes(minutes).and_then(|delta| at.checked_add_signed(delta))
}

/// Treat empty strings as absent references.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a stored timestamp: RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
