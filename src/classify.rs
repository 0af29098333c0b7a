use candid::Principal;
use serde::Serialize;
use sha2::Digest;
use std::fmt::Display;

/// Length of a ledger subaccount qualifier.
pub const SUBACCOUNT_LEN: usize = 32;

/// Collapses an on-wire subaccount into its canonical form.
///
/// The ledgers treat an all-zero subaccount as "no subaccount", so both spell
/// the same account. Anything that is not exactly 32 bytes is unusable as a
/// qualifier and is also treated as absent.
pub fn normalize_subaccount(bytes: &[u8]) -> Option<[u8; SUBACCOUNT_LEN]> {
    let sub: [u8; SUBACCOUNT_LEN] = bytes.try_into().ok()?;
    if sub.iter().all(|b| *b == 0) {
        None
    } else {
        Some(sub)
    }
}

/// An owner principal plus optional subaccount, as decoded from a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcrcAccount {
    pub owner: Principal,
    pub subaccount: Option<[u8; SUBACCOUNT_LEN]>,
}

impl IcrcAccount {
    pub fn new(owner: Principal, subaccount: Option<&[u8]>) -> Self {
        IcrcAccount {
            owner,
            subaccount: subaccount.and_then(normalize_subaccount),
        }
    }
}

impl Display for IcrcAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subaccount {
            Some(sub) => write!(f, "{}.{}", self.owner.to_text(), hex::encode(sub)),
            None => write!(f, "{}", self.owner.to_text()),
        }
    }
}

/// Derives the 32-byte legacy account identifier for a principal.
///
/// Layout is a big-endian CRC32 of the SHA-224 digest, followed by the
/// digest itself.
pub fn account_identifier(owner: &Principal, subaccount: Option<&[u8; SUBACCOUNT_LEN]>) -> [u8; 32] {
    let mut hasher = sha2::Sha224::new();
    hasher.update(b"\x0Aaccount-id");
    hasher.update(owner.as_slice());
    hasher.update(subaccount.map(|s| s.as_slice()).unwrap_or(&[0u8; SUBACCOUNT_LEN]));
    let hash: [u8; 28] = hasher.finalize().into();

    let mut crc = crc32fast::Hasher::new();
    crc.update(&hash);

    let mut result = [0u8; 32];
    result[0..4].copy_from_slice(&crc.finalize().to_be_bytes());
    result[4..32].copy_from_slice(&hash);
    result
}

/// The identity being monitored, in both address schemes the ledgers use.
#[derive(Debug, Clone)]
pub struct WatchedAccount {
    pub owner: Principal,
    pub subaccount: Option<[u8; SUBACCOUNT_LEN]>,
    /// Legacy account identifier derived from owner + subaccount.
    pub account_id: [u8; 32],
    /// When set, subaccounts must match exactly; otherwise only the owner
    /// principal is compared.
    pub strict_subaccount: bool,
}

impl WatchedAccount {
    pub fn new(owner: Principal, subaccount: Option<[u8; SUBACCOUNT_LEN]>, strict: bool) -> Self {
        let subaccount = subaccount.and_then(|s| normalize_subaccount(&s));
        let account_id = account_identifier(&owner, subaccount.as_ref());
        WatchedAccount {
            owner,
            subaccount,
            account_id,
            strict_subaccount: strict,
        }
    }

    pub fn account_id_hex(&self) -> String {
        hex::encode(self.account_id)
    }

    /// Compares against a decoded owner/subaccount pair.
    pub fn matches_icrc(&self, account: &IcrcAccount) -> bool {
        if account.owner != self.owner {
            return false;
        }
        if self.strict_subaccount {
            account.subaccount == self.subaccount
        } else {
            true
        }
    }

    /// Compares against raw account-identifier bytes from a ledger block.
    ///
    /// The wire carries either the 32-byte canonical form or the bare
    /// 28-byte hash.
    pub fn matches_account_bytes(&self, bytes: &[u8]) -> bool {
        match bytes.len() {
            32 => bytes == self.account_id.as_slice(),
            28 => bytes == &self.account_id[4..],
            _ => false,
        }
    }
}

/// How a transfer moved value relative to the watched account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
    #[serde(rename = "self")]
    SelfTransfer,
    Mint,
    Burn,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Inflow => "inflow",
            Direction::Outflow => "outflow",
            Direction::SelfTransfer => "self",
            Direction::Mint => "mint",
            Direction::Burn => "burn",
        };
        write!(f, "{s}")
    }
}

/// Classifies a transfer given which sides matched the watched account.
///
/// Returns `None` when neither side matches; such records are dropped.
pub fn classify(from_matches: bool, to_matches: bool) -> Option<Direction> {
    match (from_matches, to_matches) {
        (true, true) => Some(Direction::SelfTransfer),
        (true, false) => Some(Direction::Outflow),
        (false, true) => Some(Direction::Inflow),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Principal {
        Principal::from_text("ryjl3-tyaaa-aaaaa-aaaba-cai").unwrap()
    }

    fn other() -> Principal {
        Principal::from_text("mxzaz-hqaaa-aaaar-qaada-cai").unwrap()
    }

    #[test]
    fn all_zero_subaccount_normalizes_to_none() {
        assert_eq!(normalize_subaccount(&[0u8; 32]), None);
    }

    #[test]
    fn nonzero_subaccount_survives_normalization() {
        let mut sub = [0u8; 32];
        sub[31] = 1;
        assert_eq!(normalize_subaccount(&sub), Some(sub));
        sub[0] = 0xff;
        assert_eq!(normalize_subaccount(&sub), Some(sub));
    }

    #[test]
    fn wrong_length_subaccount_is_absent() {
        assert_eq!(normalize_subaccount(&[1u8; 31]), None);
        assert_eq!(normalize_subaccount(&[1u8; 33]), None);
        assert_eq!(normalize_subaccount(&[]), None);
    }

    #[test]
    fn classification_is_total_and_exclusive() {
        assert_eq!(classify(true, true), Some(Direction::SelfTransfer));
        assert_eq!(classify(true, false), Some(Direction::Outflow));
        assert_eq!(classify(false, true), Some(Direction::Inflow));
        assert_eq!(classify(false, false), None);
    }

    #[test]
    fn owner_only_matching_ignores_subaccount() {
        let watched = WatchedAccount::new(owner(), None, false);
        let mut sub = [0u8; 32];
        sub[0] = 7;
        let same_owner_sub = IcrcAccount::new(owner(), Some(&sub));
        assert!(watched.matches_icrc(&same_owner_sub));
        let different = IcrcAccount::new(other(), None);
        assert!(!watched.matches_icrc(&different));
    }

    #[test]
    fn strict_matching_compares_subaccounts() {
        let mut sub = [0u8; 32];
        sub[0] = 7;
        let watched = WatchedAccount::new(owner(), Some(sub), true);
        assert!(watched.matches_icrc(&IcrcAccount::new(owner(), Some(&sub))));
        assert!(!watched.matches_icrc(&IcrcAccount::new(owner(), None)));
        // The all-zero subaccount and an absent one are the same account.
        let zero_watched = WatchedAccount::new(owner(), Some([0u8; 32]), true);
        assert!(zero_watched.matches_icrc(&IcrcAccount::new(owner(), Some(&[0u8; 32]))));
        assert!(zero_watched.matches_icrc(&IcrcAccount::new(owner(), None)));
    }

    #[test]
    fn account_identifier_matches_both_wire_lengths() {
        let watched = WatchedAccount::new(owner(), None, false);
        let id = watched.account_id;
        assert!(watched.matches_account_bytes(&id));
        assert!(watched.matches_account_bytes(&id[4..]));
        assert!(!watched.matches_account_bytes(&id[..20]));
        let other_id = account_identifier(&other(), None);
        assert!(!watched.matches_account_bytes(&other_id));
    }

    #[test]
    fn subaccount_changes_account_identifier() {
        let mut sub = [0u8; 32];
        sub[31] = 1;
        let base = account_identifier(&owner(), None);
        let with_sub = account_identifier(&owner(), Some(&sub));
        assert_ne!(base, with_sub);
        // All-zero subaccount hashes identically to no subaccount.
        assert_eq!(base, account_identifier(&owner(), Some(&[0u8; 32])));
    }
}
