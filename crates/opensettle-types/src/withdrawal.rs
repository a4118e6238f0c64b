//! Withdrawal intents.
//!
//! A withdrawal intent is created atomically with the balance debit that
//! funds it and is immutable afterwards. Intents live in an ordered queue
//! scoped to one (subnet, not-yet-committed) epoch; once a commitment forms
//! over the queue, the queue is frozen and owned by the settlement path.

use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::ids::{UserId, WithdrawalId};

/// A request to move `amount` of `asset` out of the execution ledger to an
/// external destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalIntent {
    pub withdrawal_id: WithdrawalId,
    pub user_id: UserId,
    pub asset: Asset,
    /// Strictly positive; the funding debit has already been applied.
    pub amount: i128,
    /// External destination account.
    pub destination: [u8; 32],
}

impl WithdrawalIntent {
    /// Well-formedness: the constructibility condition. Returns the first
    /// violated rule, or `None` if the intent can be turned into an
    /// external transaction.
    #[must_use]
    pub fn malformed_reason(&self) -> Option<&'static str> {
        if self.amount <= 0 {
            return Some("amount must be positive");
        }
        if self.destination == [0u8; 32] {
            return Some("destination must be non-zero");
        }
        if !self.asset.code_is_valid() {
            return Some("asset code must be 1-12 characters");
        }
        None
    }
}
