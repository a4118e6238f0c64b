//! Commitment persistence.
//!
//! [`CommitmentStore`] is the durable tier of the Commitment Plane: a
//! production implementation must survive restart, because the last
//! committed block number is what enforces monotonicity across process
//! lifetimes. The in-memory implementation is for tests and
//! single-process deployments.

use std::collections::BTreeMap;
use std::sync::Mutex;

use opensettle_types::{Commitment, OpenSettleError, Result, SubnetId};

/// Durable commitment storage with atomic check-then-write semantics.
pub trait CommitmentStore: Send + Sync {
    /// The last committed block number for a subnet, if any.
    fn last_committed_block(&self, subnet_id: &SubnetId) -> Option<u64>;

    /// Atomically store a commitment iff its block number is strictly
    /// greater than the subnet's last committed block, advancing that
    /// watermark in the same step.
    ///
    /// This is the compare-and-set that prevents two concurrent proposals
    /// from double-committing: exactly one of two racing callers with the
    /// same block number succeeds.
    ///
    /// # Errors
    /// [`OpenSettleError::StaleBlockNumber`] if the block number does not
    /// advance the watermark.
    fn compare_and_store(&self, commitment: &Commitment) -> Result<()>;

    /// Look up a stored commitment.
    fn get(&self, subnet_id: &SubnetId, block_number: u64) -> Option<Commitment>;
}

/// In-memory [`CommitmentStore`]. State is scoped to the process.
#[derive(Default)]
pub struct InMemoryCommitmentStore {
    inner: Mutex<BTreeMap<SubnetId, SubnetSlot>>,
}

#[derive(Default)]
struct SubnetSlot {
    last_committed: Option<u64>,
    commitments: BTreeMap<u64, Commitment>,
}

impl InMemoryCommitmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitmentStore for InMemoryCommitmentStore {
    fn last_committed_block(&self, subnet_id: &SubnetId) -> Option<u64> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(subnet_id).and_then(|slot| slot.last_committed)
    }

    fn compare_and_store(&self, commitment: &Commitment) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = inner.entry(commitment.subnet_id).or_default();
        if let Some(last) = slot.last_committed {
            if commitment.block_number <= last {
                return Err(OpenSettleError::StaleBlockNumber {
                    proposed: commitment.block_number,
                    last_committed: last,
                });
            }
        }
        slot.last_committed = Some(commitment.block_number);
        slot.commitments.insert(commitment.block_number, *commitment);
        Ok(())
    }

    fn get(&self, subnet_id: &SubnetId, block_number: u64) -> Option<Commitment> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .get(subnet_id)
            .and_then(|slot| slot.commitments.get(&block_number))
            .copied()
    }
}
