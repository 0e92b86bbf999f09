//! Offline garbage-collection auditor for distributed object-lifecycle
//! traces.
//!
//! This crate reconstructs distributed reference-lifecycle state from a
//! replayed, ordered event log: who holds a reference to what, when a
//! reference degrades from reachable to merely recognizable, when it could
//! have been reclaimed, and whether a two-party remote link and a persisted
//! ordinal-indexed collection remain internally consistent. It audits a
//! trace of a garbage-collection protocol; it is not the collector itself.
//!
//! # Architecture
//!
//! ```text
//! Events ──> Auditor ──> ReferenceTable (one per participant)
//!                   └──> OwnershipLedger (one per run)
//! Events (two-party) ──> RemoteLink
//! Snapshot ──> CollectionOrdinalIndex::check
//!                       \
//!                        ──> ReportBuilder ──> AuditReport
//! ```
//!
//! The core is single-threaded, single-pass, and performs no I/O: the
//! caller decodes its log format into [`AuditEvent`] values, feeds them in
//! order, and renders the resulting [`AuditReport`] however it likes.
//! Structural inconsistencies in the trace are recorded as [`Violation`]
//! values and never abort the run; unintelligible input items are skipped
//! individually as [`MalformedInput`].

pub mod auditor;
pub mod event;
pub mod ledger;
pub mod ordinal;
pub mod refs;
pub mod reftable;
pub mod remote;
pub mod report;
pub mod violation;

pub use auditor::Auditor;
pub use event::{AuditEvent, CompletionStatus, Delivery, EventKind, Resolution, SlotPair, Syscall};
pub use ledger::{ImporterCounts, OwnershipLedger, OwnershipRecord};
pub use ordinal::{parse_snapshot, CollectionOrdinalIndex, SnapshotParse};
pub use refs::{GlobalRef, LocalRef, Polarity, RefKind, VatId};
pub use reftable::{ReachabilityState, ReferenceTable, ReferenceTableEntry};
pub use remote::{Direction, GcAction, LinkMessage, LinkPayload, LinkResolution, RemoteLink};
pub use report::{AuditReport, ReportBuilder};
pub use violation::{Leak, MalformedInput, Violation};
