//! Deterministic state-root construction.
//!
//! Balances and withdrawals are canonicalized into leaf hashes, each leaf
//! set is sorted by leaf hash bytes, and the two Merkle roots are combined
//! with the subnet nonce into a single root. Sorting by leaf hash is what
//! makes the result independent of insertion order: the root depends only
//! on the *set* of non-zero balances and the queue contents.
//!
//! Everything here is pure. Given bit-identical input, the output is
//! bit-identical on every host — this is the cross-component contract the
//! Commitment Plane verifies against.

use opensettle_types::{BalanceEntry, LedgerHasher, StateRoot, WithdrawalIntent, ZERO_HASH};

/// Compute the state root over a subnet's balances, withdrawal queue, and
/// nonce.
///
/// Zero balances are excluded; an empty leaf set produces the zero-hash
/// sentinel for that side of the root.
#[must_use]
pub fn compute_state_root(
    hasher: &dyn LedgerHasher,
    balances: &[BalanceEntry],
    withdrawals: &[WithdrawalIntent],
    nonce: u64,
) -> StateRoot {
    let balance_leaves: Vec<[u8; 32]> = balances
        .iter()
        .filter(|entry| !entry.is_zero())
        .map(|entry| balance_leaf(hasher, entry))
        .collect();
    let withdrawal_leaves: Vec<[u8; 32]> = withdrawals
        .iter()
        .map(|intent| withdrawal_leaf(hasher, intent))
        .collect();

    StateRoot {
        balances_root: merkle_root(hasher, balance_leaves),
        withdrawals_root: merkle_root(hasher, withdrawal_leaves),
        nonce,
    }
}

/// Balance leaf: `H("BAL" || user_id || asset_code || issuer || amount_be16)`.
#[must_use]
pub fn balance_leaf(hasher: &dyn LedgerHasher, entry: &BalanceEntry) -> [u8; 32] {
    let amount_be = entry.amount.to_be_bytes();
    hasher.digest(&[
        b"BAL",
        entry.user_id.as_bytes(),
        entry.asset.code.as_bytes(),
        entry.asset.issuer.as_hash_bytes(),
        &amount_be,
    ])
}

/// Withdrawal leaf:
/// `H("WD" || withdrawal_id || user_id || asset_code || issuer || amount_be16 || destination)`.
#[must_use]
pub fn withdrawal_leaf(hasher: &dyn LedgerHasher, intent: &WithdrawalIntent) -> [u8; 32] {
    let amount_be = intent.amount.to_be_bytes();
    hasher.digest(&[
        b"WD",
        intent.withdrawal_id.as_bytes(),
        intent.user_id.as_bytes(),
        intent.asset.code.as_bytes(),
        intent.asset.issuer.as_hash_bytes(),
        &amount_be,
        &intent.destination,
    ])
}

/// Fold a leaf set into a binary Merkle root.
///
/// Leaves are sorted by hash bytes first. At each level an odd trailing
/// node is duplicated to pair with itself; internal nodes are
/// `H(left || right)`. An empty set yields the zero-hash sentinel.
#[must_use]
pub fn merkle_root(hasher: &dyn LedgerHasher, mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    leaves.sort_unstable();

    let mut level = leaves;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(hasher.digest(&[left, right]));
        }
        level = next;
    }
    level[0]
}
