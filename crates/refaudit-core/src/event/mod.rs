//! Typed event model for replayed traces.
//!
//! The log-acquisition layer (out of scope here) decodes whatever wire or
//! slog format the host system emits into these types exactly once; the core
//! never inspects untyped structures. Five kinds of event reach the auditor:
//! deliveries into a participant, delivery results, syscalls issued by a
//! participant, syscall results, and lifecycle/creation events.
//!
//! Every reference citation travels as a [`SlotPair`] carrying both the
//! participant-relative form and the canonical kernel form, so the reference
//! tables and the ownership ledger can each be fed without a translation
//! table inside the core.

use serde::{Deserialize, Serialize};

use crate::refs::{GlobalRef, LocalRef, VatId};
use crate::violation::MalformedInput;

/// A single trace event, ordered by `seq` within the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// The participant this event belongs to.
    pub participant: VatId,
    /// Position of the event in the stream, assigned by the caller.
    pub seq: u64,
    /// What happened.
    pub kind: EventKind,
}

impl AuditEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(participant: impl Into<VatId>, seq: u64, kind: EventKind) -> Self {
        Self {
            participant: participant.into(),
            seq,
            kind,
        }
    }
}

/// The five event families the core consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Kernel-to-participant delivery.
    Delivery(Delivery),
    /// Completion status of the preceding delivery.
    DeliveryResult(CompletionStatus),
    /// Participant-to-kernel syscall.
    Syscall(Syscall),
    /// Completion status of the preceding syscall.
    SyscallResult(CompletionStatus),
    /// Kernel allocation of a canonical identity for a fresh export.
    Creation {
        /// The newly allocated reference, in the exporter's polarity.
        slot: SlotPair,
    },
}

/// Deliveries the kernel makes into a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Delivery {
    /// A message delivered to a target object or promise.
    Message {
        /// The object or promise the message is addressed to.
        target: SlotPair,
        /// References cited in the message arguments.
        slots: Vec<SlotPair>,
        /// The result promise, if the sender requested one.
        result: Option<SlotPair>,
    },
    /// Notification that subscribed promises have been decided.
    Notify {
        /// One entry per decided promise.
        resolutions: Vec<Resolution>,
    },
    /// The kernel telling the participant its exports are no longer
    /// reachable by anyone.
    DropExports {
        /// The affected exports.
        slots: Vec<SlotPair>,
    },
    /// The kernel telling the participant its exports are no longer even
    /// recognizable.
    RetireExports {
        /// The affected exports.
        slots: Vec<SlotPair>,
    },
    /// The kernel telling the participant that objects it imports have
    /// ceased to exist.
    RetireImports {
        /// The affected imports.
        slots: Vec<SlotPair>,
    },
}

/// Syscalls a participant makes against the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Syscall {
    /// An outbound message.
    Send {
        /// The object or promise the message is addressed to.
        target: SlotPair,
        /// References cited in the message arguments.
        slots: Vec<SlotPair>,
        /// The result promise, if one was allocated.
        result: Option<SlotPair>,
    },
    /// Deciding promises the participant holds the decider role for.
    Resolve {
        /// One entry per decided promise.
        resolutions: Vec<Resolution>,
    },
    /// Subscribing to a promise's resolution.
    Subscribe {
        /// The promise being subscribed to.
        target: SlotPair,
    },
    /// Dropping reachability of imported objects.
    DropImports {
        /// The affected imports.
        slots: Vec<SlotPair>,
    },
    /// Retiring recognition of imported objects.
    RetireImports {
        /// The affected imports.
        slots: Vec<SlotPair>,
    },
    /// Retiring the participant's own dropped exports.
    RetireExports {
        /// The affected exports.
        slots: Vec<SlotPair>,
    },
}

/// Outcome of a delivery or syscall, recorded for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The operation completed normally.
    Ok,
    /// The operation failed; the message is host-defined.
    Error {
        /// Host-supplied failure description.
        message: String,
    },
}

/// One decided promise inside a resolve or notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The promise being decided.
    pub subject: SlotPair,
    /// `true` for rejections.
    pub rejected: bool,
    /// References cited in the resolution payload.
    pub slots: Vec<SlotPair>,
}

/// A reference citation: the participant-relative vref paired with the
/// kernel kref naming the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPair {
    /// The vat-relative reference.
    pub local: LocalRef,
    /// The canonical kernel reference.
    pub global: GlobalRef,
}

impl SlotPair {
    /// Creates a slot pair.
    #[must_use]
    pub const fn new(local: LocalRef, global: GlobalRef) -> Self {
        Self { local, global }
    }

    /// Validates that both halves name the same kind of entity.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput::KindMismatch`] when an object vref is
    /// paired with a promise kref or vice versa.
    pub fn validate(&self) -> Result<(), MalformedInput> {
        if self.local.kind == self.global.kind {
            Ok(())
        } else {
            Err(MalformedInput::KindMismatch {
                local: self.local,
                global: self.global,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pair_kind_mismatch_is_malformed() {
        let ok = SlotPair::new(LocalRef::object_import(1), GlobalRef::object(10));
        assert!(ok.validate().is_ok());

        let bad = SlotPair::new(LocalRef::object_import(1), GlobalRef::promise(10));
        assert!(matches!(
            bad.validate(),
            Err(MalformedInput::KindMismatch { .. })
        ));
    }

    #[test]
    fn events_serialize_with_tags() {
        let ev = AuditEvent::new(
            "v3",
            7,
            EventKind::Syscall(Syscall::DropImports {
                slots: vec![SlotPair::new(
                    LocalRef::object_import(4),
                    GlobalRef::object(9),
                )],
            }),
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["participant"], "v3");
        assert_eq!(json["kind"]["type"], "syscall");
        assert_eq!(json["kind"]["method"], "dropImports");
        assert_eq!(json["kind"]["slots"][0]["local"], "o-4");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }
}
