use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Quantity recorded under a policy id: either a bare amount or a map of asset
/// names to amounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetQuantity {
    Amount(u64),
    Named(BTreeMap<String, u64>),
}

/// Multi-asset amount carried by an output. The base unit lives in `lovelace`;
/// every other entry is keyed by policy id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lovelace: Option<u64>,
    #[serde(flatten)]
    pub assets: BTreeMap<String, AssetQuantity>,
}

impl Value {
    pub fn lovelace(amount: u64) -> Self {
        Self {
            lovelace: Some(amount),
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, policy: impl Into<String>, quantity: AssetQuantity) -> Self {
        self.assets.insert(policy.into(), quantity);
        self
    }

    pub fn base_amount(&self) -> u64 {
        self.lovelace.unwrap_or_default()
    }

    /// Quantity of `asset` under `policy`, treating a bare policy amount as the
    /// unnamed asset.
    pub fn asset_amount(&self, policy: &str, asset: Option<&str>) -> u64 {
        match (self.assets.get(policy), asset) {
            (Some(AssetQuantity::Amount(amount)), None) => *amount,
            (Some(AssetQuantity::Named(named)), Some(name)) => {
                named.get(name).copied().unwrap_or_default()
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lovelace_and_policy_entries() {
        let value: Value = serde_json::from_str(
            r#"{"lovelace": 5000000, "abcd": {"746f6b656e": 3}, "ef01": 7}"#,
        )
        .expect("decode value");

        assert_eq!(value.base_amount(), 5_000_000);
        assert_eq!(value.asset_amount("abcd", Some("746f6b656e")), 3);
        assert_eq!(value.asset_amount("ef01", None), 7);
        assert_eq!(value.asset_amount("missing", None), 0);
    }

    #[test]
    fn built_value_encodes_like_the_wire_form() {
        let mut named = BTreeMap::new();
        named.insert("746f6b656e".to_string(), 3);
        let value = Value::lovelace(2_000_000)
            .with_asset("abcd", AssetQuantity::Named(named))
            .with_asset("ef01", AssetQuantity::Amount(7));

        let json = serde_json::to_value(&value).expect("encode value");
        assert_eq!(
            json,
            serde_json::json!({"lovelace": 2_000_000, "abcd": {"746f6b656e": 3}, "ef01": 7})
        );
        assert_eq!(value.asset_amount("abcd", Some("746f6b656e")), 3);
        assert_eq!(value.asset_amount("ef01", None), 7);
    }

    #[test]
    fn missing_lovelace_counts_as_zero() {
        let value: Value = serde_json::from_str(r#"{"abcd": 1}"#).expect("decode value");
        assert_eq!(value.lovelace, None);
        assert_eq!(value.base_amount(), 0);
    }
}
