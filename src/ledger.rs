//! Per-party committed balances collected while a head is initializing.

use std::collections::btree_map::{self, BTreeMap};

use serde::Serialize;

use crate::types::UtxoSet;

/// Mapping from a party's verification key to the outputs it has committed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CommittedLedger {
    by_party: BTreeMap<String, UtxoSet>,
}

impl CommittedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additively merges `utxo` into the entry for `party`, creating it when
    /// absent. Previously committed outputs survive; a repeated reference is
    /// overwritten by the newer output.
    pub fn merge(&mut self, party: &str, utxo: &UtxoSet) {
        self.by_party
            .entry(party.to_owned())
            .or_default()
            .merge(utxo);
    }

    /// Replaces the entry for `party` wholesale.
    pub fn replace(&mut self, party: &str, utxo: UtxoSet) -> Option<UtxoSet> {
        self.by_party.insert(party.to_owned(), utxo)
    }

    pub fn get(&self, party: &str) -> Option<&UtxoSet> {
        self.by_party.get(party)
    }

    pub fn parties(&self) -> impl Iterator<Item = &str> {
        self.by_party.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, UtxoSet> {
        self.by_party.iter()
    }

    pub fn len(&self) -> usize {
        self.by_party.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_party.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_party.clear();
    }

    pub fn total_lovelace(&self) -> u64 {
        self.by_party
            .values()
            .map(UtxoSet::total_lovelace)
            .fold(0u64, u64::saturating_add)
    }
}
