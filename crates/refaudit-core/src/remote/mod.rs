//! Two-sided remote link reconciler.
//!
//! A remote link connects exactly two participants exchanging
//! reference-bearing payloads. Each side keeps its own polarity-relative
//! view of the link's import and export sets; references on the wire are
//! expressed in the *sender's* polarity, so a receiving side flips every
//! cited reference before touching its tables.
//!
//! Reachability bookkeeping here is deliberately link-scoped, not
//! participant-scoped: an object exported to two different peers has
//! independent state on each link, and conflating the two is precisely the
//! class of bug this reconciler exists to catch. GC sub-messages replay the
//! same `Reachable -> Recognizable -> retired` machine as the per-participant
//! reference table, in the flipped polarity for receives.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::refs::{LocalRef, Polarity, RefKind, VatId};
use crate::reftable::ReachabilityState;
use crate::violation::Violation;

/// Which way a payload moved relative to the link's owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The owning side sent this payload.
    Tx,
    /// The owning side received this payload from the peer.
    Rx,
}

/// A structured batch of sub-messages crossing the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPayload {
    /// The sub-messages, in transmission order.
    pub messages: Vec<LinkMessage>,
}

impl LinkPayload {
    /// Wraps a list of sub-messages.
    #[must_use]
    pub fn new(messages: Vec<LinkMessage>) -> Self {
        Self { messages }
    }
}

/// One sub-message inside a link payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LinkMessage {
    /// A message delivery citing a target and argument references.
    Deliver {
        /// The object or promise addressed, in sender polarity.
        target: LocalRef,
        /// References cited in the arguments, in sender polarity.
        slots: Vec<LocalRef>,
        /// The result promise, if requested, in sender polarity.
        result: Option<LocalRef>,
    },
    /// Promise decisions.
    Resolve {
        /// One entry per decided promise.
        resolutions: Vec<LinkResolution>,
    },
    /// A garbage-collection action.
    Gc {
        /// What kind of GC step this is, named from the receiver's
        /// perspective (the importer sends `DropExport` to the exporter).
        action: GcAction,
        /// The affected references, in sender polarity.
        refs: Vec<LocalRef>,
    },
}

/// One decided promise inside a [`LinkMessage::Resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkResolution {
    /// The promise being decided, in sender polarity.
    pub subject: LocalRef,
    /// `true` for rejections.
    pub rejected: bool,
    /// References cited in the resolution payload, in sender polarity.
    pub slots: Vec<LocalRef>,
}

/// GC sub-message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GcAction {
    /// The importer no longer reaches the export (drop messaging rights).
    DropExport,
    /// The importer no longer even recognizes the export.
    RetireExport,
    /// The exporter declares the underlying object gone; importers must
    /// retire recognition.
    RetireImport,
}

/// One reference tracked on a link, in local polarity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    /// The reference, in local polarity.
    pub local_ref: LocalRef,
    /// Current lifecycle state on this link.
    pub state: ReachabilityState,
    /// Sequence number of the payload that introduced it.
    pub introduced_at: u64,
    /// Sequence number of the payload that last cited it.
    pub last_cited_at: u64,
}

/// One side's view of a remote link between two participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLink {
    local: VatId,
    peer: VatId,
    exports: HashMap<LocalRef, LinkEntry>,
    imports: HashMap<LocalRef, LinkEntry>,
    resolved: HashSet<LocalRef>,
    violations: Vec<Violation>,
}

impl RemoteLink {
    /// Creates the view held by `local` of its link to `peer`.
    #[must_use]
    pub fn new(local: impl Into<VatId>, peer: impl Into<VatId>) -> Self {
        Self {
            local: local.into(),
            peer: peer.into(),
            exports: HashMap::new(),
            imports: HashMap::new(),
            resolved: HashSet::new(),
            violations: Vec::new(),
        }
    }

    /// The participant whose view this is.
    #[must_use]
    pub fn local(&self) -> &VatId {
        &self.local
    }

    /// The participant on the other side.
    #[must_use]
    pub fn peer(&self) -> &VatId {
        &self.peer
    }

    /// Looks up a tracked export (local polarity `+`).
    #[must_use]
    pub fn export(&self, local_ref: &LocalRef) -> Option<&LinkEntry> {
        self.exports.get(local_ref)
    }

    /// Looks up a tracked import (local polarity `-`).
    #[must_use]
    pub fn import(&self, local_ref: &LocalRef) -> Option<&LinkEntry> {
        self.imports.get(local_ref)
    }

    /// Iterates over tracked exports (unordered).
    pub fn exports(&self) -> impl Iterator<Item = &LinkEntry> {
        self.exports.values()
    }

    /// Iterates over tracked imports (unordered).
    pub fn imports(&self) -> impl Iterator<Item = &LinkEntry> {
        self.imports.values()
    }

    /// Violations recorded so far, in discovery order.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Drains the recorded violations for the reporter.
    pub fn take_violations(&mut self) -> Vec<Violation> {
        std::mem::take(&mut self.violations)
    }

    /// Replays one payload crossing the link.
    ///
    /// `seq` orders payloads for violation context; violations are recorded
    /// internally and never abort processing.
    pub fn observe(&mut self, direction: Direction, payload: &LinkPayload, seq: u64) {
        for message in &payload.messages {
            match message {
                LinkMessage::Deliver {
                    target,
                    slots,
                    result,
                } => {
                    self.cite(self.normalize(direction, *target), direction, seq);
                    for slot in slots {
                        self.cite(self.normalize(direction, *slot), direction, seq);
                    }
                    if let Some(res) = result {
                        self.cite(self.normalize(direction, *res), direction, seq);
                    }
                },
                LinkMessage::Resolve { resolutions } => {
                    for resolution in resolutions {
                        self.resolve(self.normalize(direction, resolution.subject), seq);
                        for slot in &resolution.slots {
                            self.cite(self.normalize(direction, *slot), direction, seq);
                        }
                    }
                },
                LinkMessage::Gc { action, refs } => {
                    for r in refs {
                        self.gc(*action, direction, self.normalize(direction, *r), seq);
                    }
                },
            }
        }
    }

    /// Flips wire polarity into local polarity for received payloads.
    fn normalize(&self, direction: Direction, r: LocalRef) -> LocalRef {
        match direction {
            Direction::Tx => r,
            Direction::Rx => r.flip(),
        }
    }

    /// Handles a citation in a deliver/resolve payload, `local_ref` already
    /// in local polarity.
    fn cite(&mut self, local_ref: LocalRef, direction: Direction, seq: u64) {
        let is_export = local_ref.is_export();
        // A peer citing our export back at us must name something we
        // actually exported on this link; anything else is fabricated.
        if is_export && direction == Direction::Rx && !self.exports.contains_key(&local_ref) {
            self.record(Violation::FakeReference {
                local: self.local.clone(),
                peer: self.peer.clone(),
                local_ref,
                seq,
            });
            return;
        }
        let table = if is_export {
            &mut self.exports
        } else {
            &mut self.imports
        };
        if let Some(entry) = table.get_mut(&local_ref) {
            entry.last_cited_at = seq;
            if entry.state == ReachabilityState::Recognizable {
                entry.state = ReachabilityState::Reachable;
                let violation = Violation::UseAfterDrop {
                    participant: self.local.clone(),
                    local_ref,
                    global_ref: None,
                    seq,
                };
                self.record(violation);
            }
            return;
        }
        table.insert(
            local_ref,
            LinkEntry {
                local_ref,
                state: ReachabilityState::Reachable,
                introduced_at: seq,
                last_cited_at: seq,
            },
        );
    }

    /// Handles a promise decision, `local_ref` already in local polarity.
    fn resolve(&mut self, local_ref: LocalRef, seq: u64) {
        if local_ref.kind != RefKind::Promise {
            let actual = self.entry(&local_ref).map(|e| e.state);
            let violation = Violation::InvalidRetire {
                participant: self.local.clone(),
                local_ref,
                actual,
                seq,
            };
            self.record(violation);
            return;
        }
        let table = if local_ref.is_export() {
            &mut self.exports
        } else {
            &mut self.imports
        };
        table.remove(&local_ref);
        self.resolved.insert(local_ref);
    }

    /// Replays one GC action, `local_ref` already in local polarity.
    fn gc(&mut self, action: GcAction, direction: Direction, local_ref: LocalRef, seq: u64) {
        // The action names the receiver's side of the relationship, so the
        // polarity each direction may legally name is fixed.
        let expected = match (action, direction) {
            (GcAction::DropExport | GcAction::RetireExport, Direction::Rx)
            | (GcAction::RetireImport, Direction::Tx) => Polarity::Export,
            (GcAction::DropExport | GcAction::RetireExport, Direction::Tx)
            | (GcAction::RetireImport, Direction::Rx) => Polarity::Import,
        };
        if local_ref.polarity != expected || local_ref.kind == RefKind::Promise {
            self.record(Violation::FakeReference {
                local: self.local.clone(),
                peer: self.peer.clone(),
                local_ref,
                seq,
            });
            return;
        }
        let participant = self.local.clone();
        let table = if local_ref.is_export() {
            &mut self.exports
        } else {
            &mut self.imports
        };
        match action {
            GcAction::DropExport => {
                let actual = table.get(&local_ref).map(|e| e.state);
                if actual == Some(ReachabilityState::Reachable) {
                    if let Some(entry) = table.get_mut(&local_ref) {
                        entry.state = ReachabilityState::Recognizable;
                    }
                } else {
                    self.record(Violation::InvalidDrop {
                        participant,
                        local_ref,
                        actual,
                        seq,
                    });
                }
            },
            GcAction::RetireExport | GcAction::RetireImport => {
                match table.get(&local_ref).map(|e| e.state) {
                    Some(ReachabilityState::Recognizable) => {
                        table.remove(&local_ref);
                    },
                    Some(state) => self.record(Violation::InvalidRetire {
                        participant,
                        local_ref,
                        actual: Some(state),
                        seq,
                    }),
                    None => self.record(Violation::UnknownRetire {
                        participant,
                        local_ref,
                        seq,
                    }),
                }
            },
        }
    }

    fn entry(&self, local_ref: &LocalRef) -> Option<&LinkEntry> {
        if local_ref.is_export() {
            self.exports.get(local_ref)
        } else {
            self.imports.get(local_ref)
        }
    }

    fn record(&mut self, violation: Violation) {
        tracing::warn!(link = %format_args!("{}<->{}", self.local, self.peer), %violation, "link violation");
        self.violations.push(violation);
    }
}
