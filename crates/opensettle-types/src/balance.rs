//! Balance rows exported by the ledger store for state-root construction.

use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::ids::UserId;

/// A single (user, asset) balance row.
///
/// Amounts are signed 128-bit integers in the asset's smallest unit and are
/// never negative after any ledger operation — debits that would go below
/// zero are rejected, not clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub user_id: UserId,
    pub asset: Asset,
    pub amount: i128,
}

impl BalanceEntry {
    #[must_use]
    pub fn new(user_id: UserId, asset: Asset, amount: i128) -> Self {
        Self {
            user_id,
            asset,
            amount,
        }
    }

    /// Zero balances are excluded from state-root leaves.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_detection() {
        let entry = BalanceEntry::new(UserId([1; 32]), Asset::native("XLM"), 0);
        assert!(entry.is_zero());
        let entry = BalanceEntry::new(UserId([1; 32]), Asset::native("XLM"), 5);
        assert!(!entry.is_zero());
    }

    #[test]
    fn serde_roundtrip() {
        let entry = BalanceEntry::new(UserId([3; 32]), Asset::issued("USDC", [9; 32]), 1_500_000);
        let json = serde_json::to_string(&entry).unwrap();
        let back: BalanceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
