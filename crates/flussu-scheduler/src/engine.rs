//! Timed-call engine: one pass over the work-record store.
//!
//! Per invocation: `SELECT → {CHECK_DUE → (skip | CLAIM → DISPATCH → RECORD)}`.
//! Records are handled strictly one after another. The claim is the only guard
//! against double dispatch, so it runs before any outbound call and is never undone.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flussu_core::config::TimedCallConfig;
use flussu_core::{Result, TargetPolicy};
use futures::FutureExt;
use serde::Serialize;

use crate::audit::AuditSink;
use crate::record::WorkRecord;
use crate::store::{ClaimOutcome, SessionLookup, WorkStore};
use crate::target::{self, MISSING_TARGET};
use crate::transport::{Transport, TransportError};

/// Result string for calls addressed to a dead session.
pub const SESSION_EXPIRED: &str = "ERROR:[0]:Session expired";
/// Result string when the dispatch itself panicked.
pub const DISPATCH_ABORTED: &str = "ERROR:[-1]:Dispatch aborted";

/// Knobs for building and sending a call.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub policy: TargetPolicy,
}

impl DispatchSettings {
    pub fn from_config(config: &TimedCallConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
            policy: config.policy,
        }
    }
}

/// What one dispatch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Resolved call URI; `None` when no call was attempted.
    pub uri: Option<String>,
    /// Response body or `ERROR:[code]:reason`.
    pub result: String,
}

impl DispatchOutcome {
    fn short_circuit(result: impl Into<String>) -> Self {
        Self {
            uri: None,
            result: result.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.starts_with("ERROR:[")
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub candidates: usize,
    pub skipped_not_due: usize,
    pub claimed: usize,
    pub already_claimed: usize,
    pub claim_failed: usize,
    pub dispatched_ok: usize,
    pub dispatched_err: usize,
    pub record_failed: usize,
}

/// The timed-call dispatcher.
pub struct Dispatcher {
    store: Arc<dyn WorkStore>,
    sessions: Arc<dyn SessionLookup>,
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditSink>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn WorkStore>,
        sessions: Arc<dyn SessionLookup>,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            sessions,
            transport,
            audit,
            settings,
        }
    }

    /// Resolve the target and perform the call. Never fails: every problem
    /// becomes an `ERROR:[..]` result string.
    pub async fn dispatch(&self, record: &WorkRecord, now: DateTime<Utc>) -> DispatchOutcome {
        let Some(target) = target::resolve(record, self.settings.policy) else {
            return DispatchOutcome::short_circuit(MISSING_TARGET);
        };

        if let Some(session_ref) = target.session_ref() {
            match self.sessions.is_expired(session_ref, now) {
                Ok(false) => {}
                Ok(true) => return DispatchOutcome::short_circuit(SESSION_EXPIRED),
                Err(e) => {
                    return DispatchOutcome::short_circuit(format!(
                        "ERROR:[-1]:Session lookup failed: {e}"
                    ));
                }
            }
        }

        let uri = target::build_uri(&self.settings.base_url, &target, record.extra_data.as_deref());
        let result = match tokio::time::timeout(self.settings.timeout, self.transport.get(&uri)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => e.to_result_string(),
            Err(_) => TransportError::Timeout(self.settings.timeout).to_result_string(),
        };
        DispatchOutcome {
            uri: Some(uri),
            result,
        }
    }

    /// One pass at the current wall-clock time.
    pub async fn run_once(&self) -> Result<RunReport> {
        self.run_once_at(Utc::now()).await
    }

    /// One pass treating `now` as the current time.
    ///
    /// Only a failing select aborts the pass; everything else is handled per record.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport::default();
        tracing::info!(
            "⏰ Timed-call run started (policy {}, transport {})",
            self.settings.policy,
            self.transport.name()
        );
        self.audit.append(&format!("=== timed call run start {} ===", now.to_rfc3339()));

        let candidates = match self.store.select_due(true) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("⚠️ Timed-call select failed: {e}");
                self.audit.append(&format!("select failed: {e}"));
                self.audit.append("=== timed call run aborted ===");
                return Err(e);
            }
        };
        report.candidates = candidates.len();

        for record in candidates {
            self.process(&record, now, &mut report).await;
        }

        tracing::info!(
            "✅ Timed-call run finished: {} claimed, {} ok, {} failed, {} not due",
            report.claimed,
            report.dispatched_ok,
            report.dispatched_err,
            report.skipped_not_due
        );
        self.audit.append(&format!(
            "=== timed call run end: candidates={} claimed={} ok={} err={} not_due={} ===",
            report.candidates,
            report.claimed,
            report.dispatched_ok,
            report.dispatched_err,
            report.skipped_not_due
        ));
        Ok(report)
    }

    async fn process(&self, record: &WorkRecord, now: DateTime<Utc>, report: &mut RunReport) {
        let seq = record.sequence_id;
        let Some(due_at) = record.due_at() else {
            tracing::warn!(
                "⚠️ Timed call {} has a delay of {} minutes past the supported time range, skipped",
                seq,
                record.delay_minutes
            );
            self.audit.append(&format!("[{seq}] due time out of range, skipped"));
            report.skipped_not_due += 1;
            return;
        };
        if now < due_at {
            tracing::debug!("Timed call {} not due until {}", seq, due_at);
            report.skipped_not_due += 1;
            return;
        }

        match self.store.claim(seq) {
            Ok(ClaimOutcome::Claimed) => report.claimed += 1,
            Ok(ClaimOutcome::AlreadyClaimed) => {
                tracing::info!("Timed call {} already claimed by another run", seq);
                self.audit.append(&format!("[{seq}] already claimed, skipped"));
                report.already_claimed += 1;
                return;
            }
            Err(e) => {
                tracing::warn!("⚠️ Claim failed for timed call {}: {e}", seq);
                self.audit.append(&format!("[{seq}] claim failed: {e}"));
                report.claim_failed += 1;
                return;
            }
        }

        let outcome = AssertUnwindSafe(self.dispatch(record, now))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::warn!("⚠️ Dispatch of timed call {} panicked", seq);
                DispatchOutcome::short_circuit(DISPATCH_ABORTED)
            });

        if outcome.is_error() {
            report.dispatched_err += 1;
        } else {
            report.dispatched_ok += 1;
        }
        tracing::info!(
            "🔔 Timed call {} → {}",
            seq,
            outcome.uri.as_deref().unwrap_or("(no call)")
        );
        self.audit.append(&format!(
            "[{seq}] GET {} -> {}",
            outcome.uri.as_deref().unwrap_or("-"),
            outcome.result
        ));

        // The claim stays in place even if the result cannot be stored.
        if let Err(e) = self.store.record_result(seq, &outcome.result) {
            tracing::warn!("⚠️ Failed to record result for timed call {}: {e}", seq);
            self.audit.append(&format!("[{seq}] result not recorded: {e}"));
            report.record_failed += 1;
        }
    }
}
