//! Reference identity model.
//!
//! Three identifier families flow through an audit:
//!
//! - [`VatId`]: opaque participant identifier (`"v9"`), stable for the run.
//! - [`LocalRef`]: participant-relative reference (`o+12`, `p-3`) carrying a
//!   kind (object/promise), a polarity (`+` export, `-` import) and an
//!   ordinal. Polarity is always relative to the participant holding the
//!   table; the same entity appears with flipped polarity on the other side
//!   of a link.
//! - [`GlobalRef`]: the arbiter-assigned canonical identifier (`ko42`,
//!   `kp7`), unique across all participants.
//!
//! All three serialize as their textual form so they can key JSON maps in
//! rendered reports.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::violation::MalformedInput;

/// Opaque identifier for a vat/participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VatId(pub String);

impl VatId {
    /// Creates a participant identifier from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of entity a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// A plain object (presence) reference.
    Object,
    /// A promise reference.
    Promise,
}

impl RefKind {
    /// Single-character tag used in the textual forms (`o` / `p`).
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Object => 'o',
            Self::Promise => 'p',
        }
    }

    fn from_tag(c: char) -> Option<Self> {
        match c {
            'o' => Some(Self::Object),
            'p' => Some(Self::Promise),
            _ => None,
        }
    }
}

/// Direction of a reference relative to the participant holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Allocated (exported) by the holder: `+`.
    Export,
    /// Allocated by the other side (imported by the holder): `-`.
    Import,
}

impl Polarity {
    /// Single-character tag used in the textual form (`+` / `-`).
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Export => '+',
            Self::Import => '-',
        }
    }

    /// Returns the opposite polarity.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Export => Self::Import,
            Self::Import => Self::Export,
        }
    }

    fn from_tag(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Export),
            '-' => Some(Self::Import),
            _ => None,
        }
    }
}

/// A participant-local reference identifier (vref).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalRef {
    /// Object or promise.
    pub kind: RefKind,
    /// Export (`+`) or import (`-`), relative to the holder.
    pub polarity: Polarity,
    /// Numeric ordinal within the (kind, polarity) namespace.
    pub ordinal: u64,
}

impl LocalRef {
    /// Creates a local reference.
    #[must_use]
    pub const fn new(kind: RefKind, polarity: Polarity, ordinal: u64) -> Self {
        Self {
            kind,
            polarity,
            ordinal,
        }
    }

    /// Shorthand for an exported object reference (`o+N`).
    #[must_use]
    pub const fn object_export(ordinal: u64) -> Self {
        Self::new(RefKind::Object, Polarity::Export, ordinal)
    }

    /// Shorthand for an imported object reference (`o-N`).
    #[must_use]
    pub const fn object_import(ordinal: u64) -> Self {
        Self::new(RefKind::Object, Polarity::Import, ordinal)
    }

    /// Shorthand for an exported promise reference (`p+N`).
    #[must_use]
    pub const fn promise_export(ordinal: u64) -> Self {
        Self::new(RefKind::Promise, Polarity::Export, ordinal)
    }

    /// Shorthand for an imported promise reference (`p-N`).
    #[must_use]
    pub const fn promise_import(ordinal: u64) -> Self {
        Self::new(RefKind::Promise, Polarity::Import, ordinal)
    }

    /// Returns the same reference seen from the other side of a link.
    ///
    /// Involutive: `r.flip().flip() == r`.
    #[must_use]
    pub const fn flip(self) -> Self {
        Self {
            kind: self.kind,
            polarity: self.polarity.flip(),
            ordinal: self.ordinal,
        }
    }

    /// Returns `true` for exported references.
    #[must_use]
    pub const fn is_export(self) -> bool {
        matches!(self.polarity, Polarity::Export)
    }

    /// Returns `true` for promise references.
    #[must_use]
    pub const fn is_promise(self) -> bool {
        matches!(self.kind, RefKind::Promise)
    }
}

impl fmt::Display for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind.tag(), self.polarity.tag(), self.ordinal)
    }
}

impl FromStr for LocalRef {
    type Err = MalformedInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MalformedInput::BadLocalRef {
            value: s.to_string(),
        };
        let mut chars = s.chars();
        let kind = chars.next().and_then(RefKind::from_tag).ok_or_else(bad)?;
        let polarity = chars.next().and_then(Polarity::from_tag).ok_or_else(bad)?;
        let ordinal = chars.as_str().parse::<u64>().map_err(|_| bad())?;
        Ok(Self {
            kind,
            polarity,
            ordinal,
        })
    }
}

impl Serialize for LocalRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LocalRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// The arbiter-assigned canonical reference identifier (kref).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalRef {
    /// Object or promise.
    pub kind: RefKind,
    /// Numeric ordinal within the kind namespace.
    pub ordinal: u64,
}

impl GlobalRef {
    /// Creates a global reference.
    #[must_use]
    pub const fn new(kind: RefKind, ordinal: u64) -> Self {
        Self { kind, ordinal }
    }

    /// Shorthand for a kernel object reference (`koN`).
    #[must_use]
    pub const fn object(ordinal: u64) -> Self {
        Self::new(RefKind::Object, ordinal)
    }

    /// Shorthand for a kernel promise reference (`kpN`).
    #[must_use]
    pub const fn promise(ordinal: u64) -> Self {
        Self::new(RefKind::Promise, ordinal)
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}{}", self.kind.tag(), self.ordinal)
    }
}

impl FromStr for GlobalRef {
    type Err = MalformedInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MalformedInput::BadGlobalRef {
            value: s.to_string(),
        };
        let rest = s.strip_prefix('k').ok_or_else(bad)?;
        let mut chars = rest.chars();
        let kind = chars.next().and_then(RefKind::from_tag).ok_or_else(bad)?;
        let ordinal = chars.as_str().parse::<u64>().map_err(|_| bad())?;
        Ok(Self { kind, ordinal })
    }
}

impl Serialize for GlobalRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GlobalRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn local_ref_round_trips_through_text() {
        for text in ["o+12", "o-3", "p+7", "p-1", "o+0"] {
            let r: LocalRef = text.parse().unwrap();
            assert_eq!(r.to_string(), text);
        }
    }

    #[test]
    fn global_ref_round_trips_through_text() {
        for text in ["ko42", "kp7", "ko0"] {
            let r: GlobalRef = text.parse().unwrap();
            assert_eq!(r.to_string(), text);
        }
    }

    #[test]
    fn malformed_refs_are_rejected() {
        for text in ["", "o12", "x+1", "o+", "o+abc", "o*3"] {
            assert!(text.parse::<LocalRef>().is_err(), "accepted {text:?}");
        }
        for text in ["", "o42", "kx3", "ko", "ko-1"] {
            assert!(text.parse::<GlobalRef>().is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn flip_swaps_polarity_only() {
        let r = LocalRef::object_export(5);
        let flipped = r.flip();
        assert_eq!(flipped, LocalRef::object_import(5));
        assert_eq!(flipped.kind, r.kind);
        assert_eq!(flipped.ordinal, r.ordinal);
    }

    #[test]
    fn refs_serialize_as_strings() {
        let r = LocalRef::promise_import(9);
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"p-9\"");
        let g = GlobalRef::object(42);
        assert_eq!(serde_json::to_string(&g).unwrap(), "\"ko42\"");
        let back: GlobalRef = serde_json::from_str("\"ko42\"").unwrap();
        assert_eq!(back, g);
    }

    fn arb_local_ref() -> impl Strategy<Value = LocalRef> {
        (
            prop::sample::select(&[RefKind::Object, RefKind::Promise][..]),
            prop::sample::select(&[Polarity::Export, Polarity::Import][..]),
            any::<u64>(),
        )
            .prop_map(|(kind, polarity, ordinal)| LocalRef::new(kind, polarity, ordinal))
    }

    proptest! {
        /// Property: polarity flip is an involution.
        #[test]
        fn prop_flip_is_involutive(r in arb_local_ref()) {
            prop_assert_eq!(r.flip().flip(), r);
        }

        /// Property: textual form parses back to the same reference.
        #[test]
        fn prop_text_round_trip(r in arb_local_ref()) {
            let parsed: LocalRef = r.to_string().parse().unwrap();
            prop_assert_eq!(parsed, r);
        }
    }
}
