//! Per-participant reference table.
//!
//! Tracks the lifecycle state of every reference a participant holds or
//! exports, replaying the trace's introduce/drop/retire/resolve actions
//! through the state machine:
//!
//! ```text
//! (absent) --Introduce--> Reachable --Drop--> Recognizable --Retire--> (removed)
//! ```
//!
//! Objects walk the full chain. Promises skip `Recognizable` entirely: a
//! resolution removes the entry in one step, and a later retire merely
//! clears the resolved-set marker. Every illegal transition is recorded as a
//! [`Violation`] and the table is left unchanged (except for the documented
//! use-after-drop promotion), so a single bad region of a truncated log
//! never poisons the rest of the audit.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::event::{AuditEvent, Delivery, EventKind, Syscall};
use crate::refs::{GlobalRef, LocalRef, RefKind, VatId};
use crate::violation::Violation;

/// How usable a tracked reference still is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityState {
    /// The holder can still send messages through this reference.
    Reachable,
    /// The holder can only test identity; messaging rights are gone.
    /// Exists for object references only, never promises.
    Recognizable,
}

/// One tracked reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTableEntry {
    /// The participant-relative reference.
    pub local_ref: LocalRef,
    /// The canonical identity of the referenced entity.
    pub global_ref: GlobalRef,
    /// Current lifecycle state.
    pub state: ReachabilityState,
    /// Sequence number of the event that first introduced the reference.
    pub introduced_at: u64,
    /// Sequence number of the most recent citation.
    pub last_cited_at: u64,
}

/// The reference table of a single participant.
///
/// Owned exclusively by the audit run; one instance per participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceTable {
    participant: VatId,
    entries: HashMap<LocalRef, ReferenceTableEntry>,
    by_global: HashMap<GlobalRef, LocalRef>,
    resolved: HashSet<LocalRef>,
}

impl ReferenceTable {
    /// Creates an empty table for one participant.
    #[must_use]
    pub fn new(participant: impl Into<VatId>) -> Self {
        Self {
            participant: participant.into(),
            entries: HashMap::new(),
            by_global: HashMap::new(),
            resolved: HashSet::new(),
        }
    }

    /// The participant this table belongs to.
    #[must_use]
    pub fn participant(&self) -> &VatId {
        &self.participant
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no references are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by its participant-relative reference.
    #[must_use]
    pub fn get(&self, local_ref: &LocalRef) -> Option<&ReferenceTableEntry> {
        self.entries.get(local_ref)
    }

    /// Looks up an entry by the canonical identity it maps to.
    #[must_use]
    pub fn get_by_global(&self, global_ref: &GlobalRef) -> Option<&ReferenceTableEntry> {
        self.by_global
            .get(global_ref)
            .and_then(|local| self.entries.get(local))
    }

    /// Iterates over all live entries (unordered).
    pub fn entries(&self) -> impl Iterator<Item = &ReferenceTableEntry> {
        self.entries.values()
    }

    /// Returns `true` if the given promise has been resolved.
    #[must_use]
    pub fn is_resolved(&self, local_ref: &LocalRef) -> bool {
        self.resolved.contains(local_ref)
    }

    /// Records a citation of `local_ref` in a message payload, argument
    /// slot, or promise result slot.
    ///
    /// Absent references are inserted as `Reachable`. Citing a
    /// `Recognizable` entry is a use-after-drop: the violation is recorded
    /// and the entry is promoted back to `Reachable` so downstream
    /// accounting follows what the trace actually shows. Citing a resolved
    /// promise is treated the same way: the resolved-set marker is cleared,
    /// the entry is reinserted, and the violation records the breach.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::UseAfterDrop`] when the reference had already
    /// been dropped or resolved.
    pub fn introduce(
        &mut self,
        local_ref: LocalRef,
        global_ref: GlobalRef,
        seq: u64,
    ) -> Result<(), Violation> {
        if let Some(entry) = self.entries.get_mut(&local_ref) {
            entry.last_cited_at = seq;
            if entry.state == ReachabilityState::Recognizable {
                entry.state = ReachabilityState::Reachable;
                return Err(Violation::UseAfterDrop {
                    participant: self.participant.clone(),
                    local_ref,
                    global_ref: Some(global_ref),
                    seq,
                });
            }
            return Ok(());
        }
        let was_resolved = self.resolved.remove(&local_ref);
        self.entries.insert(
            local_ref,
            ReferenceTableEntry {
                local_ref,
                global_ref,
                state: ReachabilityState::Reachable,
                introduced_at: seq,
                last_cited_at: seq,
            },
        );
        self.by_global.insert(global_ref, local_ref);
        if was_resolved {
            return Err(Violation::UseAfterDrop {
                participant: self.participant.clone(),
                local_ref,
                global_ref: Some(global_ref),
                seq,
            });
        }
        Ok(())
    }

    /// Records an explicit drop action: `Reachable` → `Recognizable`.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::InvalidDrop`] for promises, absent entries, and
    /// entries not currently `Reachable`; the table is left unchanged.
    pub fn drop_ref(&mut self, local_ref: LocalRef, seq: u64) -> Result<(), Violation> {
        let actual = self.entries.get(&local_ref).map(|e| e.state);
        if local_ref.kind == RefKind::Promise || actual != Some(ReachabilityState::Reachable) {
            return Err(Violation::InvalidDrop {
                participant: self.participant.clone(),
                local_ref,
                actual,
                seq,
            });
        }
        if let Some(entry) = self.entries.get_mut(&local_ref) {
            entry.state = ReachabilityState::Recognizable;
        }
        Ok(())
    }

    /// Records an explicit retire action, removing the entry.
    ///
    /// Objects must be `Recognizable`. Promises must have been resolved
    /// (the resolution already removed the entry; retiring clears the
    /// resolved-set marker).
    ///
    /// # Errors
    ///
    /// Returns [`Violation::UnknownRetire`] for references never seen (the
    /// truncated-log case) and [`Violation::InvalidRetire`] for entries in
    /// the wrong state.
    pub fn retire(&mut self, local_ref: LocalRef, seq: u64) -> Result<(), Violation> {
        if local_ref.kind == RefKind::Promise {
            if self.resolved.remove(&local_ref) {
                return Ok(());
            }
            return match self.entries.get(&local_ref) {
                Some(entry) => Err(Violation::InvalidRetire {
                    participant: self.participant.clone(),
                    local_ref,
                    actual: Some(entry.state),
                    seq,
                }),
                None => Err(Violation::UnknownRetire {
                    participant: self.participant.clone(),
                    local_ref,
                    seq,
                }),
            };
        }
        match self.entries.get(&local_ref).map(|e| e.state) {
            Some(ReachabilityState::Recognizable) => {
                self.remove(&local_ref);
                Ok(())
            },
            Some(state) => Err(Violation::InvalidRetire {
                participant: self.participant.clone(),
                local_ref,
                actual: Some(state),
                seq,
            }),
            None => Err(Violation::UnknownRetire {
                participant: self.participant.clone(),
                local_ref,
                seq,
            }),
        }
    }

    /// Records a promise decision, removing the entry in one step.
    ///
    /// Resolving a promise the table has never seen is tolerated (truncated
    /// logs): the resolved-set marker is still written so a later retire is
    /// legal.
    ///
    /// # Errors
    ///
    /// Returns [`Violation::InvalidRetire`] when the subject is not a
    /// promise; resolution is the promise analogue of retirement and cannot
    /// target an object.
    pub fn resolve(&mut self, local_ref: LocalRef, seq: u64) -> Result<(), Violation> {
        if local_ref.kind != RefKind::Promise {
            let actual = self.entries.get(&local_ref).map(|e| e.state);
            return Err(Violation::InvalidRetire {
                participant: self.participant.clone(),
                local_ref,
                actual,
                seq,
            });
        }
        self.remove(&local_ref);
        self.resolved.insert(local_ref);
        Ok(())
    }

    /// Replays one event's reference actions against this table, collecting
    /// every violation it produces.
    ///
    /// Events belonging to other participants, and event kinds with no
    /// reference actions, are ignored. Standalone entry point for callers
    /// auditing a single participant; the full-stream driver dispatches the
    /// same operations itself so it can mirror them into the ownership
    /// ledger.
    pub fn apply(&mut self, event: &AuditEvent) -> Vec<Violation> {
        if event.participant != self.participant {
            return Vec::new();
        }
        let seq = event.seq;
        let mut violations = Vec::new();
        let mut record = |result: Result<(), Violation>| {
            if let Err(v) = result {
                violations.push(v);
            }
        };
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
                record(self.introduce(target.local, target.global, seq));
                for slot in slots {
                    record(self.introduce(slot.local, slot.global, seq));
                }
                if let Some(res) = result {
                    record(self.introduce(res.local, res.global, seq));
                }
            },
            EventKind::Delivery(Delivery::Notify { resolutions })
            | EventKind::Syscall(Syscall::Resolve { resolutions }) => {
                for resolution in resolutions {
                    record(self.resolve(resolution.subject.local, seq));
                    for slot in &resolution.slots {
                        record(self.introduce(slot.local, slot.global, seq));
                    }
                }
            },
            EventKind::Delivery(Delivery::DropExports { slots })
            | EventKind::Syscall(Syscall::DropImports { slots }) => {
                for slot in slots {
                    record(self.drop_ref(slot.local, seq));
                }
            },
            EventKind::Delivery(Delivery::RetireExports { slots })
            | EventKind::Delivery(Delivery::RetireImports { slots })
            | EventKind::Syscall(Syscall::RetireImports { slots })
            | EventKind::Syscall(Syscall::RetireExports { slots }) => {
                for slot in slots {
                    record(self.retire(slot.local, seq));
                }
            },
            EventKind::Syscall(Syscall::Subscribe { target }) => {
                record(self.introduce(target.local, target.global, seq));
            },
            EventKind::Creation { slot } => {
                record(self.introduce(slot.local, slot.global, seq));
            },
            EventKind::DeliveryResult(_) | EventKind::SyscallResult(_) => {},
        }
        violations
    }

    fn remove(&mut self, local_ref: &LocalRef) {
        if let Some(entry) = self.entries.remove(local_ref) {
            self.by_global.remove(&entry.global_ref);
        }
    }
}
