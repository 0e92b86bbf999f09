//! Cross-participant ownership and refcount ledger.
//!
//! For every canonical reference the ledger remembers which participant
//! owns (exported) it and what each importer currently contributes to its
//! aggregate reachable/recognizable counts, mirroring the per-participant
//! reference table semantics but scoped per importer.
//!
//! The stream is processed sequentially and each importer's contribution is
//! written only by that importer's processing step, so no locking exists
//! here. A parallel implementation would have to partition these records per
//! reference or serialize access; nothing else in the core is shared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::refs::{GlobalRef, VatId};
use crate::reftable::ReachabilityState;

/// One importer's contribution to a reference's aggregate counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImporterCounts {
    /// Citations held reachable by this importer.
    pub reachable: u32,
    /// Citations held merely recognizable by this importer.
    pub recognizable: u32,
}

impl ImporterCounts {
    /// Returns `true` when this importer contributes nothing.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.reachable == 0 && self.recognizable == 0
    }

    /// The strongest state this importer still holds, if any.
    #[must_use]
    pub const fn state(self) -> Option<ReachabilityState> {
        if self.reachable > 0 {
            Some(ReachabilityState::Reachable)
        } else if self.recognizable > 0 {
            Some(ReachabilityState::Recognizable)
        } else {
            None
        }
    }
}

/// Ownership and per-importer counts for one canonical reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// The reference this record describes.
    pub global_ref: GlobalRef,
    /// The exporting participant, once observed.
    pub owner: Option<VatId>,
    /// Contribution of each importer, keyed for deterministic iteration.
    pub importer_counts: BTreeMap<VatId, ImporterCounts>,
}

impl OwnershipRecord {
    fn new(global_ref: GlobalRef) -> Self {
        Self {
            global_ref,
            owner: None,
            importer_counts: BTreeMap::new(),
        }
    }

    /// Returns `true` when no importer contributes any count.
    #[must_use]
    pub fn has_no_importers(&self) -> bool {
        self.importer_counts.values().all(|c| c.is_zero())
    }
}

/// The ledger itself: one instance per audit run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnershipLedger {
    records: BTreeMap<GlobalRef, OwnershipRecord>,
    in_flight: BTreeMap<GlobalRef, u32>,
}

impl OwnershipLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `owner` exported `global_ref`.
    ///
    /// The first observed exporter wins; a conflicting later claim is
    /// logged and ignored (the trace itself is the authority being audited,
    /// and re-exports of the same reference are a parser artifact).
    pub fn record_export(&mut self, owner: &VatId, global_ref: GlobalRef) {
        let record = self.entry(global_ref);
        match &record.owner {
            None => record.owner = Some(owner.clone()),
            Some(existing) if existing != owner => {
                tracing::warn!(
                    global_ref = %global_ref,
                    existing = %existing,
                    claimed = %owner,
                    "conflicting ownership claim ignored"
                );
            },
            Some(_) => {},
        }
    }

    /// Records a fresh import citation by `importer`.
    pub fn record_import(&mut self, importer: &VatId, global_ref: GlobalRef, reachable: bool) {
        let counts = self.counts_mut(importer, global_ref);
        if reachable {
            counts.reachable += 1;
        } else {
            counts.recognizable += 1;
        }
    }

    /// Mirrors an importer-side drop: one reachable citation becomes
    /// recognizable.
    pub fn record_drop(&mut self, importer: &VatId, global_ref: GlobalRef) {
        let counts = self.counts_mut(importer, global_ref);
        if counts.reachable == 0 {
            tracing::warn!(
                importer = %importer,
                global_ref = %global_ref,
                "drop with no reachable contribution recorded"
            );
            return;
        }
        counts.reachable -= 1;
        counts.recognizable += 1;
    }

    /// Mirrors an importer-side retire: one recognizable citation is
    /// removed.
    pub fn record_retire(&mut self, importer: &VatId, global_ref: GlobalRef) {
        let counts = self.counts_mut(importer, global_ref);
        if counts.recognizable == 0 {
            tracing::warn!(
                importer = %importer,
                global_ref = %global_ref,
                "retire with no recognizable contribution recorded"
            );
            return;
        }
        counts.recognizable -= 1;
    }

    /// Mirrors an importer-side full removal of a reachable citation
    /// (promise resolution, which skips the recognizable phase).
    pub fn record_removal(&mut self, importer: &VatId, global_ref: GlobalRef) {
        let counts = self.counts_mut(importer, global_ref);
        counts.reachable = counts.reachable.saturating_sub(1);
    }

    /// Mirrors a use-after-drop promotion: one recognizable citation moves
    /// back to reachable.
    pub fn record_promotion(&mut self, importer: &VatId, global_ref: GlobalRef) {
        let counts = self.counts_mut(importer, global_ref);
        counts.recognizable = counts.recognizable.saturating_sub(1);
        counts.reachable += 1;
    }

    /// Marks one outbound citation of `global_ref` as in flight.
    pub fn note_send(&mut self, global_ref: GlobalRef) {
        *self.in_flight.entry(global_ref).or_default() += 1;
    }

    /// Clears one in-flight citation of `global_ref` (its delivery was
    /// observed).
    pub fn note_arrival(&mut self, global_ref: GlobalRef) {
        if let Some(count) = self.in_flight.get_mut(&global_ref) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(&global_ref);
            }
        }
    }

    /// Number of citations of `global_ref` still in flight.
    #[must_use]
    pub fn in_flight(&self, global_ref: &GlobalRef) -> u32 {
        self.in_flight.get(global_ref).copied().unwrap_or(0)
    }

    /// Looks up the record for a reference.
    #[must_use]
    pub fn get(&self, global_ref: &GlobalRef) -> Option<&OwnershipRecord> {
        self.records.get(global_ref)
    }

    /// The owner of a reference, once observed.
    #[must_use]
    pub fn owner(&self, global_ref: &GlobalRef) -> Option<&VatId> {
        self.records.get(global_ref).and_then(|r| r.owner.as_ref())
    }

    /// Explains why a reference survives: every participant still
    /// contributing a count, with the strongest state it holds.
    ///
    /// Results are ordered by participant for deterministic reporting.
    #[must_use]
    pub fn who_retains(&self, global_ref: &GlobalRef) -> Vec<(VatId, ReachabilityState)> {
        let Some(record) = self.records.get(global_ref) else {
            return Vec::new();
        };
        record
            .importer_counts
            .iter()
            .filter_map(|(vat, counts)| counts.state().map(|s| (vat.clone(), s)))
            .collect()
    }

    /// Iterates over all records in reference order.
    pub fn records(&self) -> impl Iterator<Item = &OwnershipRecord> {
        self.records.values()
    }

    fn entry(&mut self, global_ref: GlobalRef) -> &mut OwnershipRecord {
        self.records
            .entry(global_ref)
            .or_insert_with(|| OwnershipRecord::new(global_ref))
    }

    fn counts_mut(&mut self, importer: &VatId, global_ref: GlobalRef) -> &mut ImporterCounts {
        self.entry(global_ref)
            .importer_counts
            .entry(importer.clone())
            .or_default()
    }
}
