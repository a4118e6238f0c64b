//! Per-subnet ledger store.
//!
//! One store instance owns one subnet's balances and its current epoch's
//! withdrawal queue. Mutations take `&mut self` and are applied
//! sequentially — the store is a single-writer state machine; concurrency
//! across subnets comes from giving each subnet its own store.
//!
//! Balance invariant: a balance is never negative after any operation.
//! Debits that would cross zero are rejected with the full shortfall,
//! never clamped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use opensettle_types::{
    Asset, AssetId, BalanceEntry, LedgerHasher, OpenSettleError, Result, StateRoot, SubnetId,
    UserId, WithdrawalId, WithdrawalIntent,
};

use crate::state_root::compute_state_root;

/// Internal balance slot. Keeps the full [`Asset`] alongside the amount so
/// leaf construction can reach the code and issuer without a reverse
/// lookup.
#[derive(Debug, Clone)]
struct BalanceSlot {
    asset: Asset,
    amount: i128,
}

/// Single-writer ledger state for one subnet.
pub struct LedgerStore<H: LedgerHasher> {
    subnet_id: SubnetId,
    hasher: H,
    balances: BTreeMap<(UserId, AssetId), BalanceSlot>,
    queue: Vec<WithdrawalIntent>,
    /// Epoch counter folded into every state root. Advanced only through
    /// [`LedgerStore::seal_queue`].
    nonce: AtomicU64,
}

impl<H: LedgerHasher> LedgerStore<H> {
    #[must_use]
    pub fn new(subnet_id: SubnetId, hasher: H) -> Self {
        Self {
            subnet_id,
            hasher,
            balances: BTreeMap::new(),
            queue: Vec::new(),
            nonce: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn subnet_id(&self) -> SubnetId {
        self.subnet_id
    }

    /// Current epoch nonce.
    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Bookkeeping operations
    // -----------------------------------------------------------------

    /// Credit `amount` of `asset` to a user.
    pub fn credit(&mut self, user_id: UserId, asset: &Asset, amount: i128) -> Result<()> {
        if amount <= 0 {
            return Err(OpenSettleError::InvalidAmount {
                reason: format!("credit amount must be positive, got {amount}"),
            });
        }
        let asset_id = asset.id(&self.hasher);
        let slot = self
            .balances
            .entry((user_id, asset_id))
            .or_insert_with(|| BalanceSlot {
                asset: asset.clone(),
                amount: 0,
            });
        slot.amount = slot.amount.checked_add(amount).ok_or_else(|| {
            OpenSettleError::InvalidAmount {
                reason: format!("credit overflows balance for {user_id}"),
            }
        })?;
        Ok(())
    }

    /// Debit `amount` of `asset` from a user. Rejected if the available
    /// balance is insufficient; the balance is left untouched on failure.
    pub fn debit(&mut self, user_id: UserId, asset: &Asset, amount: i128) -> Result<()> {
        if amount <= 0 {
            return Err(OpenSettleError::InvalidAmount {
                reason: format!("debit amount must be positive, got {amount}"),
            });
        }
        let asset_id = asset.id(&self.hasher);
        let available = self
            .balances
            .get(&(user_id, asset_id))
            .map_or(0, |slot| slot.amount);
        if available < amount {
            return Err(OpenSettleError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        // Checked above; the entry must exist since available >= amount > 0.
        if let Some(slot) = self.balances.get_mut(&(user_id, asset_id)) {
            slot.amount -= amount;
        }
        Ok(())
    }

    /// Move `amount` of `asset` between two users. Atomic: the credit only
    /// happens if the debit succeeds.
    pub fn transfer(
        &mut self,
        from: UserId,
        to: UserId,
        asset: &Asset,
        amount: i128,
    ) -> Result<()> {
        self.debit(from, asset, amount)?;
        self.credit(to, asset, amount)
    }

    /// Create a withdrawal intent, debiting the user in the same step.
    ///
    /// The intent is immutable once queued. If the debit fails, no intent
    /// is created.
    pub fn request_withdrawal(
        &mut self,
        withdrawal_id: WithdrawalId,
        user_id: UserId,
        asset: &Asset,
        amount: i128,
        destination: [u8; 32],
    ) -> Result<()> {
        let intent = WithdrawalIntent {
            withdrawal_id,
            user_id,
            asset: asset.clone(),
            amount,
            destination,
        };
        if let Some(reason) = intent.malformed_reason() {
            return Err(OpenSettleError::InvalidAmount {
                reason: reason.to_string(),
            });
        }
        if self
            .queue
            .iter()
            .any(|queued| queued.withdrawal_id == withdrawal_id)
        {
            return Err(OpenSettleError::DuplicateWithdrawal(withdrawal_id));
        }

        self.debit(user_id, asset, amount)?;
        debug!(subnet = %self.subnet_id, %withdrawal_id, amount, "withdrawal queued");
        self.queue.push(intent);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Balance for a (user, asset) pair. Missing entries are zero.
    #[must_use]
    pub fn balance(&self, user_id: UserId, asset_id: &AssetId) -> i128 {
        self.balances
            .get(&(user_id, *asset_id))
            .map_or(0, |slot| slot.amount)
    }

    /// The current epoch's withdrawal queue, in request order.
    #[must_use]
    pub fn pending_withdrawals(&self) -> &[WithdrawalIntent] {
        &self.queue
    }

    /// Snapshot of every balance row, for state-root construction.
    #[must_use]
    pub fn balance_entries(&self) -> Vec<BalanceEntry> {
        self.balances
            .iter()
            .map(|((user_id, _), slot)| {
                BalanceEntry::new(*user_id, slot.asset.clone(), slot.amount)
            })
            .collect()
    }

    /// State root over the current balances, queue, and nonce.
    #[must_use]
    pub fn state_root(&self) -> StateRoot {
        compute_state_root(
            &self.hasher,
            &self.balance_entries(),
            &self.queue,
            self.nonce(),
        )
    }

    // -----------------------------------------------------------------
    // Epoch handoff
    // -----------------------------------------------------------------

    /// Freeze and hand off the current withdrawal queue.
    ///
    /// Returns the drained queue and the nonce it was committed under,
    /// then advances the nonce atomically. After sealing, the returned
    /// queue is owned by the settlement path; the store starts collecting
    /// the next epoch's withdrawals.
    pub fn seal_queue(&mut self) -> (Vec<WithdrawalIntent>, u64) {
        let sealed_nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let queue = std::mem::take(&mut self.queue);
        debug!(
            subnet = %self.subnet_id,
            nonce = sealed_nonce,
            withdrawals = queue.len(),
            "withdrawal queue sealed"
        );
        (queue, sealed_nonce)
    }
}
