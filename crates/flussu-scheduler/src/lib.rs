//! # Flussu Scheduler
//!
//! Timed-call dispatcher. Invoked periodically by an external timer, it makes
//! one pass over the work-record store and exits.
//!
//! ## Architecture
//! ```text
//! Dispatcher::run_once
//!   ├── WorkStore::select_due      coarse filter on `enabled`
//!   ├── WorkRecord::is_due         authoritative due-time check
//!   ├── WorkStore::claim           conditional update, at most once
//!   ├── Dispatcher::dispatch
//!   │     ├── target::resolve      session / workflow / complete
//!   │     ├── SessionLookup        expired → "ERROR:[0]:Session expired"
//!   │     └── Transport::get       one GET, bounded by a timeout
//!   ├── WorkStore::record_result   always, after a successful claim
//!   └── AuditSink                  start marker, per-record lines, end marker
//! ```

pub mod audit;
pub mod engine;
pub mod persistence;
pub mod record;
pub mod store;
pub mod target;
pub mod transport;

pub use audit::{AuditSink, FileAuditSink, MemoryAuditSink};
pub use engine::{DispatchOutcome, DispatchSettings, Dispatcher, RunReport};
pub use persistence::SqliteStore;
pub use record::{NewWorkRecord, WorkRecord};
pub use store::{ClaimOutcome, SessionLookup, WorkStore};
pub use target::{Target, TargetPolicy};
pub use transport::{HttpTransport, Transport, TransportError, TransportRegistry};
