//! Event-stream driver for a whole audit run.
//!
//! The auditor owns one [`ReferenceTable`] per participant (created on
//! first sight) and the single [`OwnershipLedger`], and feeds both from the
//! stream one event at a time. Processing is strictly sequential and
//! single-pass; nothing here blocks, suspends, or performs I/O.
//!
//! Error policy follows the two-class split: structural violations are
//! recorded and processing continues; a malformed event (a slot pair whose
//! kinds disagree) is skipped whole with a diagnostic, and the stream
//! continues with the next event. A caller that wants early termination
//! simply stops calling [`Auditor::observe`] and asks for the report — no
//! invariant check depends on future events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{AuditEvent, CompletionStatus, Delivery, EventKind, SlotPair, Syscall};
use crate::ledger::OwnershipLedger;
use crate::refs::{RefKind, VatId};
use crate::reftable::{ReachabilityState, ReferenceTable};
use crate::report::{AuditReport, ReportBuilder};
use crate::violation::{MalformedInput, Violation};

/// Drives a full event stream into per-participant tables and the
/// ownership ledger.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Auditor {
    tables: HashMap<VatId, ReferenceTable>,
    ledger: OwnershipLedger,
    violations: Vec<Violation>,
    skipped: Vec<MalformedInput>,
}

impl Auditor {
    /// Creates an auditor with no state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference table of one participant, if any event has touched it.
    #[must_use]
    pub fn table(&self, participant: &VatId) -> Option<&ReferenceTable> {
        self.tables.get(participant)
    }

    /// The shared ownership ledger.
    #[must_use]
    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    /// Structural violations recorded so far, in discovery order.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Malformed items skipped so far.
    #[must_use]
    pub fn skipped(&self) -> &[MalformedInput] {
        &self.skipped
    }

    /// Processes one event.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput`] when the event could not be understood;
    /// the event has already been recorded as skipped and the auditor
    /// remains usable, so callers streaming a whole log can ignore the
    /// error and continue.
    pub fn observe(&mut self, event: &AuditEvent) -> Result<(), MalformedInput> {
        if let Err(err) = validate_event(event) {
            tracing::warn!(seq = event.seq, participant = %event.participant, %err, "skipping malformed event");
            self.skipped.push(err.clone());
            return Err(err);
        }

        let seq = event.seq;
        let participant = event.participant.clone();

        // Result events carry no reference actions; handling them first
        // keeps participants that only ever completed cranks out of the
        // table map.
        if let EventKind::DeliveryResult(status) | EventKind::SyscallResult(status) = &event.kind {
            if let CompletionStatus::Error { message } = status {
                tracing::debug!(seq, participant = %participant, message, "crank completed with error");
            }
            return Ok(());
        }

        let table = self
            .tables
            .entry(participant.clone())
            .or_insert_with(|| ReferenceTable::new(participant.clone()));
        let ledger = &mut self.ledger;
        let violations = &mut self.violations;

        match &event.kind {
            EventKind::Delivery(Delivery::Message {
                target,
                slots,
                result,
            }) => {
                for slot in cited(target, slots, result.as_ref()) {
                    ledger.note_arrival(slot.global);
                    introduce(table, ledger, violations, slot, seq);
                }
            },
            EventKind::Syscall(Syscall::Send {
                target,
                slots,
                result,
            }) => {
                for slot in cited(target, slots, result.as_ref()) {
                    ledger.note_send(slot.global);
                    introduce(table, ledger, violations, slot, seq);
                }
            },
            EventKind::Delivery(Delivery::Notify { resolutions })
            | EventKind::Syscall(Syscall::Resolve { resolutions }) => {
                for resolution in resolutions {
                    resolve(table, ledger, violations, resolution.subject, seq);
                    for slot in &resolution.slots {
                        introduce(table, ledger, violations, *slot, seq);
                    }
                }
            },
            EventKind::Delivery(Delivery::DropExports { slots })
            | EventKind::Syscall(Syscall::DropImports { slots }) => {
                for slot in slots {
                    drop_slot(table, ledger, violations, *slot, seq);
                }
            },
            EventKind::Delivery(Delivery::RetireExports { slots })
            | EventKind::Delivery(Delivery::RetireImports { slots })
            | EventKind::Syscall(Syscall::RetireImports { slots })
            | EventKind::Syscall(Syscall::RetireExports { slots }) => {
                for slot in slots {
                    retire_slot(table, ledger, violations, *slot, seq);
                }
            },
            EventKind::Syscall(Syscall::Subscribe { target }) => {
                introduce(table, ledger, violations, *target, seq);
            },
            EventKind::Creation { slot } => {
                introduce(table, ledger, violations, *slot, seq);
            },
            // Handled above, before the table was materialized.
            EventKind::DeliveryResult(_) | EventKind::SyscallResult(_) => {},
        }
        Ok(())
    }

    /// Processes a whole stream, skipping malformed events, and produces
    /// the final report.
    #[must_use]
    pub fn run(mut self, events: impl IntoIterator<Item = AuditEvent>) -> AuditReport {
        for event in events {
            let _ = self.observe(&event);
        }
        self.report()
    }

    /// Builds a report over the current (possibly partial) state.
    #[must_use]
    pub fn report(&self) -> AuditReport {
        let mut builder = ReportBuilder::new()
            .with_violations(self.violations.iter().cloned())
            .with_ledger(&self.ledger);
        for table in self.tables.values() {
            builder = builder.with_table(table);
        }
        builder.finish()
    }
}

/// Flattens a message's citations into one pass.
fn cited<'a>(
    target: &'a SlotPair,
    slots: &'a [SlotPair],
    result: Option<&'a SlotPair>,
) -> impl Iterator<Item = SlotPair> + 'a {
    std::iter::once(*target)
        .chain(slots.iter().copied())
        .chain(result.into_iter().copied())
}

/// Checks every slot pair an event carries before any state is touched.
fn validate_event(event: &AuditEvent) -> Result<(), MalformedInput> {
    let validate_all = |slots: &[SlotPair]| slots.iter().try_for_each(SlotPair::validate);
    match &event.kind {
        EventKind::Delivery(Delivery::Message {
            target,
            slots,
            result,
        })
        | EventKind::Syscall(Syscall::Send {
            target,
            slots,
            result,
        }) => {
            target.validate()?;
            validate_all(slots)?;
            result.as_ref().map_or(Ok(()), SlotPair::validate)
        },
        EventKind::Delivery(Delivery::Notify { resolutions })
        | EventKind::Syscall(Syscall::Resolve { resolutions }) => {
            for resolution in resolutions {
                resolution.subject.validate()?;
                if resolution.subject.local.kind != RefKind::Promise {
                    return Err(MalformedInput::MissingField {
                        field: "promise subject".to_string(),
                    });
                }
                validate_all(&resolution.slots)?;
            }
            Ok(())
        },
        EventKind::Delivery(Delivery::DropExports { slots })
        | EventKind::Delivery(Delivery::RetireExports { slots })
        | EventKind::Delivery(Delivery::RetireImports { slots })
        | EventKind::Syscall(Syscall::DropImports { slots })
        | EventKind::Syscall(Syscall::RetireImports { slots })
        | EventKind::Syscall(Syscall::RetireExports { slots }) => validate_all(slots),
        EventKind::Syscall(Syscall::Subscribe { target }) => target.validate(),
        EventKind::Creation { slot } => slot.validate(),
        EventKind::DeliveryResult(_) | EventKind::SyscallResult(_) => Ok(()),
    }
}

/// Introduces one citation into the table, mirroring the transition into
/// the ledger.
fn introduce(
    table: &mut ReferenceTable,
    ledger: &mut OwnershipLedger,
    violations: &mut Vec<Violation>,
    slot: SlotPair,
    seq: u64,
) {
    let fresh = table.get(&slot.local).is_none();
    let participant = table.participant().clone();
    match table.introduce(slot.local, slot.global, seq) {
        Ok(()) => {
            if fresh {
                if slot.local.is_export() {
                    ledger.record_export(&participant, slot.global);
                } else {
                    ledger.record_import(&participant, slot.global, true);
                }
            }
        },
        Err(violation) => {
            // Use-after-drop promoted the entry back to reachable; the
            // importer's contribution moves with it.
            if !slot.local.is_export() {
                ledger.record_promotion(&participant, slot.global);
            }
            violations.push(violation);
        },
    }
}

/// Applies a drop action, mirroring importer-side transitions.
fn drop_slot(
    table: &mut ReferenceTable,
    ledger: &mut OwnershipLedger,
    violations: &mut Vec<Violation>,
    slot: SlotPair,
    seq: u64,
) {
    let participant = table.participant().clone();
    match table.drop_ref(slot.local, seq) {
        Ok(()) => {
            if !slot.local.is_export() {
                ledger.record_drop(&participant, slot.global);
            }
        },
        Err(violation) => violations.push(violation),
    }
}

/// Applies a retire action, mirroring importer-side transitions.
fn retire_slot(
    table: &mut ReferenceTable,
    ledger: &mut OwnershipLedger,
    violations: &mut Vec<Violation>,
    slot: SlotPair,
    seq: u64,
) {
    let participant = table.participant().clone();
    let had_entry = table.get(&slot.local).is_some();
    match table.retire(slot.local, seq) {
        Ok(()) => {
            if !slot.local.is_export() && had_entry {
                ledger.record_retire(&participant, slot.global);
            }
        },
        Err(violation) => violations.push(violation),
    }
}

/// Applies a promise resolution, mirroring importer-side removal.
fn resolve(
    table: &mut ReferenceTable,
    ledger: &mut OwnershipLedger,
    violations: &mut Vec<Violation>,
    subject: SlotPair,
    seq: u64,
) {
    let removed = table
        .get(&subject.local)
        .is_some_and(|e| e.state == ReachabilityState::Reachable);
    let participant = table.participant().clone();
    match table.resolve(subject.local, seq) {
        Ok(()) => {
            if !subject.local.is_export() && removed {
                ledger.record_removal(&participant, subject.global);
            }
        },
        Err(violation) => violations.push(violation),
    }
}

#[cfg(test)]
mod tests;
