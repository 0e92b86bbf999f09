//! Audit report aggregation.
//!
//! The reporter is pure aggregation over finished (or partial) component
//! state: it introduces no new invariants, and it is the only component
//! permitted to shape output for an external consumer. Rendering the report
//! into text, CSV, or JSON is the caller's concern; everything here is
//! serde-serializable so any rendering is a one-liner away.
//!
//! Determinism matters: building a report twice from the same state must
//! yield byte-identical output, so every aggregate is either explicitly
//! sorted or collected into an ordered map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::OwnershipLedger;
use crate::refs::GlobalRef;
use crate::reftable::{ReachabilityState, ReferenceTable};
use crate::remote::RemoteLink;
use crate::violation::{Leak, Violation};

/// The externally consumed artifact of an audit run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Every structural violation, ordered by event sequence (snapshot-pass
    /// violations, which have no stream position, come last) with discovery
    /// order breaking ties.
    pub violations: Vec<Violation>,
    /// Leak findings, ordered by canonical reference.
    pub leaked_refs: Vec<Leak>,
    /// For each canonical reference still retained at stream end: the
    /// latest sequence number at which any retainer cited it — the earliest
    /// moment every retainer could have dropped it, for what-if scheduling.
    pub earliest_safe_drop: BTreeMap<GlobalRef, u64>,
}

/// Aggregates finished component state into an [`AuditReport`].
///
/// All inputs are borrowed; the builder never mutates component state, so a
/// caller that stopped feeding events early can still build a report over
/// whatever partial state exists.
#[derive(Debug, Default)]
pub struct ReportBuilder<'a> {
    violations: Vec<Violation>,
    tables: Vec<&'a ReferenceTable>,
    ledger: Option<&'a OwnershipLedger>,
}

impl<'a> ReportBuilder<'a> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds violations collected outside the components given below
    /// (stream-processing violations, ordinal check results).
    #[must_use]
    pub fn with_violations(mut self, violations: impl IntoIterator<Item = Violation>) -> Self {
        self.violations.extend(violations);
        self
    }

    /// Adds one participant's reference table.
    #[must_use]
    pub fn with_table(mut self, table: &'a ReferenceTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds the ownership ledger (enables leak findings).
    #[must_use]
    pub fn with_ledger(mut self, ledger: &'a OwnershipLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Adds a remote link's recorded violations.
    #[must_use]
    pub fn with_link(self, link: &RemoteLink) -> Self {
        self.with_violations(link.violations().iter().cloned())
    }

    /// Produces the report.
    #[must_use]
    pub fn finish(self) -> AuditReport {
        let mut violations = self.violations;
        violations.sort_by_key(|v| v.seq().unwrap_or(u64::MAX));

        let mut leaked_refs = Vec::new();
        if let Some(ledger) = self.ledger {
            for record in ledger.records() {
                let Some(owner) = &record.owner else {
                    continue;
                };
                if !record.has_no_importers() || ledger.in_flight(&record.global_ref) > 0 {
                    continue;
                }
                let retained = self
                    .tables
                    .iter()
                    .find(|t| t.participant() == owner)
                    .and_then(|t| t.get_by_global(&record.global_ref))
                    .filter(|e| e.state == ReachabilityState::Reachable && e.local_ref.is_export());
                if let Some(entry) = retained {
                    leaked_refs.push(Leak::UnreferencedButRetained {
                        global_ref: record.global_ref,
                        owner: owner.clone(),
                        last_cited_at: entry.last_cited_at,
                    });
                }
            }
        }

        let mut earliest_safe_drop = BTreeMap::new();
        for table in &self.tables {
            for entry in table.entries() {
                let slot = earliest_safe_drop.entry(entry.global_ref).or_insert(0u64);
                *slot = (*slot).max(entry.last_cited_at);
            }
        }

        AuditReport {
            violations,
            leaked_refs,
            earliest_safe_drop,
        }
    }
}
