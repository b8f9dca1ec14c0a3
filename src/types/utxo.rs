use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Verification key identifying a head participant.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Party {
    pub vkey: String,
}

impl Party {
    pub fn new(vkey: impl Into<String>) -> Self {
        Self { vkey: vkey.into() }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vkey)
    }
}

/// Unspent output as announced by the head node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub address: String,
    pub value: Value,
    #[serde(default, rename = "datumhash", skip_serializing_if = "Option::is_none")]
    pub datum_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_datum: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_script: Option<serde_json::Value>,
}

impl Output {
    pub fn new(address: impl Into<String>, value: Value) -> Self {
        Self {
            address: address.into(),
            value,
            datum_hash: None,
            inline_datum: None,
            reference_script: None,
        }
    }
}

/// Output set keyed by output reference (`<txid>#<index>`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtxoSet(BTreeMap<String, Output>);

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, output: Output) -> Option<Output> {
        self.0.insert(reference.into(), output)
    }

    pub fn get(&self, reference: &str) -> Option<&Output> {
        self.0.get(reference)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.0.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Output> {
        self.0.iter()
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Folds `other` into this set. Entries of `other` win on conflicting
    /// references.
    pub fn merge(&mut self, other: &UtxoSet) {
        for (reference, output) in &other.0 {
            self.0.insert(reference.clone(), output.clone());
        }
    }

    pub fn total_lovelace(&self) -> u64 {
        self.0
            .values()
            .map(|output| output.value.base_amount())
            .fold(0u64, u64::saturating_add)
    }
}

impl FromIterator<(String, Output)> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = (String, Output)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a UtxoSet {
    type Item = (&'a String, &'a Output);
    type IntoIter = btree_map::Iter<'a, String, Output>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Transaction as echoed back by the node. Only the id is interpreted; every
/// other field is kept verbatim for consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}
