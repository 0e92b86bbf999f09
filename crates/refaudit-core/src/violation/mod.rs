//! Violation, leak, and malformed-input records.
//!
//! Two classes of problem exist and they are deliberately kept apart:
//!
//! - [`Violation`]: a structural inconsistency in the replayed trace (a drop
//!   of a non-reachable reference, a fake reference on a link, an ordinal
//!   mismatch in a persisted collection). Violations are *recorded*, never
//!   thrown; processing always continues so one malformed region of a
//!   truncated log does not prevent auditing the rest.
//! - [`MalformedInput`]: a caller-contract breach (an unparseable reference,
//!   a slot pair whose kinds disagree). These abort processing of the single
//!   offending item only; the audit itself continues.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::refs::{GlobalRef, LocalRef, VatId};
use crate::reftable::ReachabilityState;

/// A structural inconsistency observed while replaying a trace.
///
/// Each variant carries enough context (participant, references, event
/// sequence number, expected vs. actual state) to be inspected individually
/// in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Violation {
    /// A recognizable-only reference was cited in a message payload.
    ///
    /// Recognizable references may only be used for identity comparison;
    /// citing one in a delivery or send means the holder used a reference it
    /// had already dropped.
    #[error("{participant}: use of dropped reference {local_ref} at seq {seq}")]
    UseAfterDrop {
        /// The participant that cited the reference.
        participant: VatId,
        /// The reference that was cited.
        local_ref: LocalRef,
        /// The canonical identity, when known.
        global_ref: Option<GlobalRef>,
        /// Sequence number of the offending event.
        seq: u64,
    },

    /// A drop action targeted a reference that cannot be dropped.
    ///
    /// Only reachable object references may be dropped; promises are removed
    /// by resolution instead.
    #[error("{participant}: invalid drop of {local_ref} at seq {seq} (state {actual:?})")]
    InvalidDrop {
        /// The participant that issued the drop.
        participant: VatId,
        /// The reference targeted by the drop.
        local_ref: LocalRef,
        /// The state the reference was actually in (`None` = absent).
        actual: Option<ReachabilityState>,
        /// Sequence number of the offending event.
        seq: u64,
    },

    /// A retire action targeted a reference in the wrong state.
    ///
    /// Objects must be recognizable before retirement; promises must have
    /// been resolved.
    #[error("{participant}: invalid retire of {local_ref} at seq {seq} (state {actual:?})")]
    InvalidRetire {
        /// The participant that issued the retire.
        participant: VatId,
        /// The reference targeted by the retire.
        local_ref: LocalRef,
        /// The state the reference was actually in (`None` = absent).
        actual: Option<ReachabilityState>,
        /// Sequence number of the offending event.
        seq: u64,
    },

    /// A retire action named a reference never seen in the trace.
    ///
    /// Real traces are occasionally truncated by log rotation mid-lifetime,
    /// so this degrades to a warning-grade record rather than an abort.
    #[error("{participant}: retire of unknown reference {local_ref} at seq {seq}")]
    UnknownRetire {
        /// The participant that issued the retire.
        participant: VatId,
        /// The unknown reference.
        local_ref: LocalRef,
        /// Sequence number of the offending event.
        seq: u64,
    },

    /// A link payload cited a reference the receiving side has no record of.
    ///
    /// After polarity normalization, a cited peer-import must already be a
    /// known local export; anything else is a fabricated reference.
    #[error("link {local}<->{peer}: fake reference {local_ref} at seq {seq}")]
    FakeReference {
        /// The side of the link that detected the mismatch.
        local: VatId,
        /// The peer on the other side of the link.
        peer: VatId,
        /// The offending reference, in local polarity.
        local_ref: LocalRef,
        /// Sequence number of the offending payload.
        seq: u64,
    },

    /// A data key's ordinal disagrees with the forward ordinal assignment.
    #[error("collection {collection}: ordinal mismatch for {vref}: data key says {data_ordinal}, assignment says {assigned:?}")]
    OrdinalMismatch {
        /// The collection being checked.
        collection: String,
        /// The entry key (opaque; virtual-object vrefs are not plain refs).
        vref: String,
        /// The ordinal embedded in the data key.
        data_ordinal: u64,
        /// The assigned ordinal, if any.
        assigned: Option<u64>,
    },

    /// An ordinal assignment has no corresponding data record.
    #[error("collection {collection}: dangling ordinal {ordinal} assigned to {vref}")]
    DanglingOrdinal {
        /// The collection being checked.
        collection: String,
        /// The entry key holding the assignment.
        vref: String,
        /// The assigned ordinal.
        ordinal: u64,
    },

    /// The stored entry count disagrees with the number of data records.
    #[error("collection {collection}: entry count {stored} but {actual} data keys")]
    CountMismatch {
        /// The collection being checked.
        collection: String,
        /// The persisted entry count.
        stored: u32,
        /// The number of data keys actually present.
        actual: u32,
    },
}

impl Violation {
    /// The event sequence number this violation was observed at, when the
    /// violation came from stream processing. Snapshot-pass violations
    /// (ordinal checks) have no stream position.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::UseAfterDrop { seq, .. }
            | Self::InvalidDrop { seq, .. }
            | Self::InvalidRetire { seq, .. }
            | Self::UnknownRetire { seq, .. }
            | Self::FakeReference { seq, .. } => Some(*seq),
            Self::OrdinalMismatch { .. }
            | Self::DanglingOrdinal { .. }
            | Self::CountMismatch { .. } => None,
        }
    }
}

/// A leak finding: memory the audit believes could have been reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Leak {
    /// An exported object with no importer contributions, no message in
    /// flight, and a still-reachable owner-side entry.
    ///
    /// These are objects that died unspent: exported but never exercised by
    /// any consumer and never explicitly retired.
    #[error("{global_ref} retained by owner {owner} with no importers (last cited at seq {last_cited_at})")]
    UnreferencedButRetained {
        /// The canonical identity of the leaked object.
        global_ref: GlobalRef,
        /// The participant that owns (exported) it.
        owner: VatId,
        /// Sequence number at which the owner last cited it.
        last_cited_at: u64,
    },
}

/// A caller-contract breach in a single input item.
///
/// Unlike [`Violation`], these mean the item itself could not be understood.
/// The offending item is skipped with a diagnostic and processing continues;
/// the run as a whole is never aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MalformedInput {
    /// A local reference string did not parse.
    #[error("malformed local reference: {value:?}")]
    BadLocalRef {
        /// The rejected text.
        value: String,
    },

    /// A global reference string did not parse.
    #[error("malformed global reference: {value:?}")]
    BadGlobalRef {
        /// The rejected text.
        value: String,
    },

    /// A slot pair's local and global kinds disagree.
    #[error("slot kind mismatch: {local} cited as {global}")]
    KindMismatch {
        /// The vat-relative reference.
        local: LocalRef,
        /// The kernel reference it was paired with.
        global: GlobalRef,
    },

    /// A snapshot key did not match any known collection key shape.
    #[error("unrecognized snapshot key: {key:?}")]
    BadSnapshotKey {
        /// The rejected key.
        key: String,
    },

    /// A snapshot value could not be parsed for its key's schema.
    #[error("bad snapshot value for {key:?}: {value:?}")]
    BadSnapshotValue {
        /// The key whose value was rejected.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// An event was missing a required field.
    #[error("event missing required field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_render_with_context() {
        let v = Violation::InvalidDrop {
            participant: VatId::from("v1"),
            local_ref: LocalRef::object_export(7),
            actual: None,
            seq: 12,
        };
        assert_eq!(v.to_string(), "v1: invalid drop of o+7 at seq 12 (state None)");
    }

    #[test]
    fn violations_serialize_tagged() {
        let v = Violation::CountMismatch {
            collection: "vc.2".to_string(),
            stored: 2,
            actual: 1,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "count_mismatch");
        assert_eq!(json["stored"], 2);
    }

    #[test]
    fn malformed_input_round_trips_through_serde() {
        let err = MalformedInput::MissingField {
            field: "|entryCount".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: MalformedInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn malformed_input_is_its_own_class() {
        let err = MalformedInput::KindMismatch {
            local: LocalRef::object_import(1),
            global: GlobalRef::promise(4),
        };
        assert_eq!(err.to_string(), "slot kind mismatch: o-1 cited as kp4");
    }
}
