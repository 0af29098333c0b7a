//! Decoding helpers for the self-describing value trees the ICRC block log
//! returns. A block is an ordered key/value map whose schema is only known
//! by key lookup; every accessor here degrades to an empty/zero/`None`
//! result rather than failing, so callers can treat absent and malformed
//! fields uniformly.

use candid::{CandidType, Deserialize, Int, Nat, Principal};

use crate::classify::IcrcAccount;

/// One node of a block-log value tree.
#[derive(Debug, Clone, PartialEq, CandidType, Deserialize)]
pub enum Value {
    Int(Int),
    Map(Vec<(String, Value)>),
    Nat(Nat),
    Nat64(u64),
    Blob(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    /// Looks up the first entry with the given key, if this is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Reads any of the numeric encodings as an unsigned integer.
    ///
    /// Negative or oversized values yield `None`.
    pub fn as_nat(&self) -> Option<u128> {
        match self {
            Value::Nat(n) => u128::try_from(n.0.clone()).ok(),
            Value::Nat64(n) => Some(u128::from(*n)),
            Value::Int(i) => u128::try_from(i.0.clone()).ok(),
            _ => None,
        }
    }
}

/// Named blob field of a map, or empty when absent or of another kind.
pub fn blob_field(value: &Value, key: &str) -> Vec<u8> {
    value
        .get(key)
        .and_then(Value::as_blob)
        .map(<[u8]>::to_vec)
        .unwrap_or_default()
}

/// Named text field of a map, or empty when absent or of another kind.
pub fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_text)
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Named numeric field of a map, or zero when absent or of another kind.
pub fn nat_field(value: &Value, key: &str) -> u128 {
    value.get(key).and_then(Value::as_nat).unwrap_or(0)
}

/// Decodes an account from either of its two wire spellings.
///
/// Ledgers emit accounts as a map `{owner: blob, subaccount: opt blob}` or
/// as an array `[owner-blob, subaccount-blob?]`. Both collapse to the same
/// canonical owner + optional subaccount. A missing or undecodable owner
/// yields `None`; a malformed subaccount is dropped, not fatal.
pub fn account_from_value(value: &Value) -> Option<IcrcAccount> {
    match value {
        Value::Map(_) => {
            let owner = Principal::try_from_slice(value.get("owner")?.as_blob()?).ok()?;
            let subaccount = value.get("subaccount").and_then(Value::as_blob);
            Some(IcrcAccount::new(owner, subaccount))
        }
        Value::Array(items) => {
            let owner = Principal::try_from_slice(items.first()?.as_blob()?).ok()?;
            let subaccount = items.get(1).and_then(Value::as_blob);
            Some(IcrcAccount::new(owner, subaccount))
        }
        _ => None,
    }
}

/// Named account field of a map, decoded via [`account_from_value`].
pub fn account_field(value: &Value, key: &str) -> Option<IcrcAccount> {
    value.get(key).and_then(account_from_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Principal {
        Principal::from_text("ryjl3-tyaaa-aaaaa-aaaba-cai").unwrap()
    }

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
    }

    #[test]
    fn map_lookup_returns_first_match_or_none() {
        let v = map(vec![
            ("amt", Value::Nat64(7)),
            ("amt", Value::Nat64(9)),
            ("op", Value::Text("xfer".into())),
        ]);
        assert_eq!(v.get("amt"), Some(&Value::Nat64(7)));
        assert_eq!(v.get("missing"), None);
        // Non-map values have no keys at all.
        assert_eq!(Value::Nat64(1).get("amt"), None);
    }

    #[test]
    fn typed_extractors_default_when_absent() {
        let v = map(vec![("memo", Value::Blob(vec![0xab, 0xcd]))]);
        assert_eq!(blob_field(&v, "memo"), vec![0xab, 0xcd]);
        assert_eq!(blob_field(&v, "nope"), Vec::<u8>::new());
        assert_eq!(text_field(&v, "nope"), "");
        assert_eq!(nat_field(&v, "nope"), 0);
        // Wrong-kind fields also fall back to the default.
        assert_eq!(text_field(&v, "memo"), "");
    }

    #[test]
    fn numeric_encodings_converge() {
        assert_eq!(Value::Nat(Nat::from(42u64)).as_nat(), Some(42));
        assert_eq!(Value::Nat64(42).as_nat(), Some(42));
        assert_eq!(Value::Int(Int::from(42)).as_nat(), Some(42));
        assert_eq!(Value::Int(Int::from(-1)).as_nat(), None);
        assert_eq!(Value::Text("42".into()).as_nat(), None);
    }

    #[test]
    fn account_decodes_from_map_form() {
        let v = map(vec![("owner", Value::Blob(owner().as_slice().to_vec()))]);
        let account = account_from_value(&v).unwrap();
        assert_eq!(account.owner, owner());
        assert_eq!(account.subaccount, None);
    }

    #[test]
    fn account_decodes_from_array_form() {
        let mut sub = [0u8; 32];
        sub[31] = 5;
        let v = Value::Array(vec![
            Value::Blob(owner().as_slice().to_vec()),
            Value::Blob(sub.to_vec()),
        ]);
        let account = account_from_value(&v).unwrap();
        assert_eq!(account.owner, owner());
        assert_eq!(account.subaccount, Some(sub));
    }

    #[test]
    fn both_forms_decode_to_the_same_identity() {
        let sub = {
            let mut s = [0u8; 32];
            s[0] = 9;
            s
        };
        let as_map = map(vec![
            ("owner", Value::Blob(owner().as_slice().to_vec())),
            ("subaccount", Value::Blob(sub.to_vec())),
        ]);
        let as_array = Value::Array(vec![
            Value::Blob(owner().as_slice().to_vec()),
            Value::Blob(sub.to_vec()),
        ]);
        assert_eq!(account_from_value(&as_map), account_from_value(&as_array));
    }

    #[test]
    fn missing_owner_yields_none() {
        let v = map(vec![("subaccount", Value::Blob(vec![1u8; 32]))]);
        assert_eq!(account_from_value(&v), None);
        assert_eq!(account_from_value(&Value::Text("not an account".into())), None);
        assert_eq!(account_from_value(&Value::Array(vec![])), None);
    }

    #[test]
    fn zero_subaccount_collapses_in_both_forms() {
        let as_map = map(vec![
            ("owner", Value::Blob(owner().as_slice().to_vec())),
            ("subaccount", Value::Blob(vec![0u8; 32])),
        ]);
        assert_eq!(account_from_value(&as_map).unwrap().subaccount, None);
    }
}
