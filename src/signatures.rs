//! Signature data model and external signature-set input.
//!
//! Signatures arrive from an external distribution collaborator as
//! `{identifier, rule}` entries; the matching core treats the set as
//! read-only input. Identifiers must be unique within a set: the compilers
//! key pattern ids on them, and duplicate identifiers would make match
//! attribution undefined. [`SignatureSet::insert`] keeps the last entry for
//! an identifier.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

/// A single detection pattern keyed by a stable numeric identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Unique identifier within a signature set.
    pub identifier: u32,
    /// Pattern rule, in the backend's regex dialect.
    pub rule: String,
}

impl Signature {
    pub fn new(identifier: u32, rule: impl Into<String>) -> Self {
        Self {
            identifier,
            rule: rule.into(),
        }
    }
}

/// An immutable mapping from signature identifier to pattern rule.
///
/// Ordered by identifier so that database compilation is deterministic for
/// a given set of signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureSet {
    signatures: BTreeMap<u32, Signature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from an iterator of signatures. Later entries for the
    /// same identifier overwrite earlier ones.
    pub fn from_signatures(signatures: impl IntoIterator<Item = Signature>) -> Self {
        let mut set = Self::new();
        for signature in signatures {
            set.insert(signature);
        }
        set
    }

    /// Loads a set from a JSON array of `{identifier, rule}` entries, the
    /// shape produced by the signature distribution service.
    pub fn from_json_reader(reader: impl Read) -> Result<Self, serde_json::Error> {
        let signatures: Vec<Signature> = serde_json::from_reader(reader)?;
        Ok(Self::from_signatures(signatures))
    }

    pub fn insert(&mut self, signature: Signature) {
        self.signatures.insert(signature.identifier, signature);
    }

    pub fn get(&self, identifier: u32) -> Option<&Signature> {
        self.signatures.get(&identifier)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterates signatures in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.values()
    }

    /// Identifier-to-rule pairs in identifier order, the form the backend
    /// compilers consume.
    pub fn rules(&self) -> impl Iterator<Item = (u32, &str)> {
        self.signatures
            .values()
            .map(|s| (s.identifier, s.rule.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_reader_parses_entries() {
        let json = r#"[
            {"identifier": 1, "rule": "evil-string"},
            {"identifier": 2, "rule": "Test"}
        ]"#;
        let set = SignatureSet::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().rule, "evil-string");
        assert_eq!(set.get(2).unwrap().rule, "Test");
    }

    #[test]
    fn duplicate_identifier_keeps_last_entry() {
        let set = SignatureSet::from_signatures([
            Signature::new(7, "first"),
            Signature::new(7, "second"),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(7).unwrap().rule, "second");
    }

    #[test]
    fn rules_iterate_in_identifier_order() {
        let set = SignatureSet::from_signatures([
            Signature::new(30, "c"),
            Signature::new(10, "a"),
            Signature::new(20, "b"),
        ]);
        let ids: Vec<u32> = set.rules().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
