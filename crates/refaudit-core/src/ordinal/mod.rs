//! Ordinal consistency checking for persisted ordinal-indexed collections.
//!
//! An ordinal-indexed collection keeps a forward index (entry key ->
//! ordinal) and one data record per entry keyed by that ordinal, plus a
//! stored entry count. The two must stay bijectively consistent and the
//! count must match; this module verifies that over a final snapshot, in a
//! single non-incremental pass, since ordinal assignment is a structural
//! invariant of storage rather than a temporal protocol.
//!
//! Persisted key shapes understood by the snapshot parser, for collection
//! `<cid>`:
//!
//! ```text
//! vc.<cid>.|entryCount          stored number of entries
//! vc.<cid>.|nextOrdinal         allocator high-water mark (metadata)
//! vc.<cid>.|schemata            key schema record (metadata)
//! vc.<cid>.|label               debug label (metadata)
//! vc.<cid>.|<vref>              ordinal assignment for an entry key
//! vc.<cid>.r<0-padded n>:<vref> data record for the entry at ordinal n
//! ```
//!
//! Entry keys are opaque strings here: virtual-object references carry
//! suffixes a plain reference parser would reject, and the checker does not
//! need to understand them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::violation::{MalformedInput, Violation};

/// Width of the zero-padded ordinal tag in data keys.
const ORDINAL_TAG_LEN: usize = 10;

/// The forward and reverse indices of one persisted collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOrdinalIndex {
    /// Identifier of the collection (the `<cid>` in its key prefix).
    pub collection_id: String,
    /// Forward index: entry key -> assigned ordinal.
    pub ordinal_assignments: BTreeMap<String, u64>,
    /// Reverse side: one `(ordinal, entry key)` per data record.
    pub data_keys: BTreeSet<(u64, String)>,
    /// The stored entry count.
    pub entry_count: u32,
}

impl CollectionOrdinalIndex {
    /// Creates an empty index for a collection.
    #[must_use]
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            ..Self::default()
        }
    }

    /// Validates the bijection between the forward index and the data
    /// records, and the stored count.
    ///
    /// Returns every violation found, in deterministic order: data-key
    /// mismatches first, then dangling assignments, then the count check.
    #[must_use]
    pub fn check(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (ordinal, vref) in &self.data_keys {
            let assigned = self.ordinal_assignments.get(vref).copied();
            if assigned != Some(*ordinal) {
                violations.push(Violation::OrdinalMismatch {
                    collection: self.collection_id.clone(),
                    vref: vref.clone(),
                    data_ordinal: *ordinal,
                    assigned,
                });
            }
        }

        for (vref, ordinal) in &self.ordinal_assignments {
            let has_data = self.data_keys.iter().any(|(_, v)| v == vref);
            if !has_data {
                violations.push(Violation::DanglingOrdinal {
                    collection: self.collection_id.clone(),
                    vref: vref.clone(),
                    ordinal: *ordinal,
                });
            }
        }

        let actual = u32::try_from(self.data_keys.len()).unwrap_or(u32::MAX);
        if self.entry_count != actual {
            violations.push(Violation::CountMismatch {
                collection: self.collection_id.clone(),
                stored: self.entry_count,
                actual,
            });
        }

        violations
    }
}

/// Result of parsing one collection out of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotParse {
    /// The reconstructed index.
    pub index: CollectionOrdinalIndex,
    /// Items that could not be understood and were skipped.
    pub skipped: Vec<MalformedInput>,
}

/// Reconstructs a [`CollectionOrdinalIndex`] from a flat key/value
/// snapshot.
///
/// Keys outside the collection's prefix are ignored; keys inside it that
/// match no known shape, and values that fail to parse, are skipped with a
/// diagnostic and collected in [`SnapshotParse::skipped`]. A missing
/// `|entryCount` is likewise a skipped item (the count stays zero, which
/// the check will then report against the data records honestly).
#[must_use]
pub fn parse_snapshot(collection_id: &str, snapshot: &BTreeMap<String, String>) -> SnapshotParse {
    let prefix = format!("vc.{collection_id}.");
    let mut index = CollectionOrdinalIndex::new(collection_id);
    let mut skipped = Vec::new();
    let mut saw_entry_count = false;

    for (key, value) in snapshot {
        let Some(suffix) = key.strip_prefix(&prefix) else {
            continue;
        };
        if let Some(meta) = suffix.strip_prefix('|') {
            match meta {
                "entryCount" => {
                    saw_entry_count = true;
                    match value.parse::<u32>() {
                        Ok(count) => index.entry_count = count,
                        Err(_) => skip(&mut skipped, bad_value(key, value)),
                    }
                },
                "nextOrdinal" | "schemata" | "label" => {},
                vref => match value.parse::<u64>() {
                    Ok(ordinal) => {
                        index.ordinal_assignments.insert(vref.to_string(), ordinal);
                    },
                    Err(_) => skip(&mut skipped, bad_value(key, value)),
                },
            }
        } else if let Some(rest) = suffix.strip_prefix('r') {
            match parse_data_key(rest) {
                Some((ordinal, vref)) => {
                    index.data_keys.insert((ordinal, vref));
                },
                None => skip(
                    &mut skipped,
                    MalformedInput::BadSnapshotKey { key: key.clone() },
                ),
            }
        } else {
            skip(
                &mut skipped,
                MalformedInput::BadSnapshotKey { key: key.clone() },
            );
        }
    }

    if !saw_entry_count {
        skip(
            &mut skipped,
            MalformedInput::MissingField {
                field: "|entryCount".to_string(),
            },
        );
    }

    SnapshotParse { index, skipped }
}

/// Splits `<0-padded ordinal>:<vref>` out of a data-key suffix.
fn parse_data_key(rest: &str) -> Option<(u64, String)> {
    let (tag, vref) = rest.split_once(':')?;
    if tag.len() != ORDINAL_TAG_LEN || vref.is_empty() {
        return None;
    }
    let ordinal = tag.parse::<u64>().ok()?;
    Some((ordinal, vref.to_string()))
}

fn bad_value(key: &str, value: &str) -> MalformedInput {
    MalformedInput::BadSnapshotValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn skip(skipped: &mut Vec<MalformedInput>, item: MalformedInput) {
    tracing::warn!(%item, "skipping malformed snapshot item");
    skipped.push(item);
}
