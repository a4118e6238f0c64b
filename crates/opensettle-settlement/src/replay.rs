//! Replay protection — at-most-once settlement per (subnet, block).
//!
//! The replay service exclusively owns the [`SettlementRecord`] lifecycle:
//! a `Pending` record is written atomically before the first submission
//! attempt, then moves to exactly one terminal state. A terminal record
//! short-circuits any later attempt with the recorded outcome and zero
//! network submissions. A `Pending` record left behind by a crash is
//! surfaced for operator investigation — it is never silently replayed,
//! because a submitted-but-unconfirmed transaction might still apply.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use opensettle_types::{
    IdempotencyToken, OpenSettleError, Result, SettlementRecord, SettlementStatus, SubnetId,
};

// ---------------------------------------------------------------------------
// ReplayStore
// ---------------------------------------------------------------------------

/// Durable record storage with atomic put-if-absent semantics.
///
/// Production implementations must survive restart — the records are what
/// stop a restarted process from settling a block twice. The in-memory
/// implementation is for tests and single-process deployments.
pub trait ReplayStore: Send + Sync {
    /// Look up the record for a (subnet, block) pair.
    fn get(&self, subnet_id: &SubnetId, block_number: u64) -> Option<SettlementRecord>;

    /// Store `record` iff no record exists for its (subnet, block) pair.
    ///
    /// # Errors
    /// [`OpenSettleError::ReplayConflict`] if a record already exists —
    /// including one written by a concurrent caller.
    fn put_if_absent(&self, record: SettlementRecord) -> Result<()>;

    /// Replace the existing record for `record`'s (subnet, block) pair.
    ///
    /// # Errors
    /// [`OpenSettleError::Internal`] if no record exists or the stored
    /// record is already terminal.
    fn update(&self, record: SettlementRecord) -> Result<()>;

    /// Remove a `Pending` record that never reached the network. Only the
    /// cancellation path uses this; a record with any submitted reference
    /// must not be removed.
    ///
    /// # Errors
    /// [`OpenSettleError::Internal`] if the record is missing, terminal,
    /// or has recorded submissions.
    fn remove_pending(&self, subnet_id: &SubnetId, block_number: u64) -> Result<()>;
}

/// In-memory [`ReplayStore`]. State is scoped to the process.
#[derive(Default)]
pub struct InMemoryReplayStore {
    inner: Mutex<BTreeMap<(SubnetId, u64), SettlementRecord>>,
}

impl InMemoryReplayStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn get(&self, subnet_id: &SubnetId, block_number: u64) -> Option<SettlementRecord> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(&(*subnet_id, block_number)).cloned()
    }

    fn put_if_absent(&self, record: SettlementRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (record.subnet_id, record.block_number);
        if inner.contains_key(&key) {
            return Err(OpenSettleError::ReplayConflict {
                subnet_id: record.subnet_id,
                block_number: record.block_number,
            });
        }
        inner.insert(key, record);
        Ok(())
    }

    fn update(&self, record: SettlementRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (record.subnet_id, record.block_number);
        match inner.get(&key) {
            None => Err(OpenSettleError::Internal(format!(
                "no settlement record for {} block {}",
                record.subnet_id, record.block_number
            ))),
            Some(existing) if existing.is_terminal() => Err(OpenSettleError::Internal(format!(
                "settlement record for {} block {} is already {}",
                record.subnet_id, record.block_number, existing.status
            ))),
            Some(_) => {
                inner.insert(key, record);
                Ok(())
            }
        }
    }

    fn remove_pending(&self, subnet_id: &SubnetId, block_number: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (*subnet_id, block_number);
        match inner.get(&key) {
            Some(record)
                if record.status == SettlementStatus::Pending && record.tx_refs.is_empty() =>
            {
                inner.remove(&key);
                Ok(())
            }
            Some(record) => Err(OpenSettleError::Internal(format!(
                "cannot release record for {subnet_id} block {block_number} in state {}",
                record.status
            ))),
            None => Err(OpenSettleError::Internal(format!(
                "no settlement record for {subnet_id} block {block_number}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ReplayProtection
// ---------------------------------------------------------------------------

/// The service the orchestrator consults before and during settlement.
pub struct ReplayProtection<S: ReplayStore> {
    store: S,
}

impl<S: ReplayStore> ReplayProtection<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Whether a (subnet, block) pair already reached a terminal state.
    #[must_use]
    pub fn is_already_settled(&self, subnet_id: &SubnetId, block_number: u64) -> bool {
        self.store
            .get(subnet_id, block_number)
            .is_some_and(|record| record.is_terminal())
    }

    /// The existing record for a (subnet, block) pair, if any.
    #[must_use]
    pub fn existing_record(
        &self,
        subnet_id: &SubnetId,
        block_number: u64,
    ) -> Option<SettlementRecord> {
        self.store.get(subnet_id, block_number)
    }

    /// Write the `Pending` record that must precede the first submission.
    ///
    /// # Errors
    /// [`OpenSettleError::ReplayConflict`] if any record already exists —
    /// the caller lost a race or is replaying a crashed settlement.
    pub fn record_pending(
        &self,
        subnet_id: SubnetId,
        block_number: u64,
        token: IdempotencyToken,
    ) -> Result<()> {
        self.store
            .put_if_absent(SettlementRecord::pending(subnet_id, block_number, token))
    }

    /// Move a `Pending` record to `Confirmed`, storing the external
    /// transaction references for later confirmation delivery.
    pub fn record_confirmed(
        &self,
        subnet_id: SubnetId,
        block_number: u64,
        token: IdempotencyToken,
        tx_refs: Vec<String>,
    ) -> Result<SettlementRecord> {
        let record = SettlementRecord {
            subnet_id,
            block_number,
            status: SettlementStatus::Confirmed,
            tx_refs,
            idempotency_token: token,
            failed_index: None,
            updated_at: Utc::now(),
        };
        self.store.update(record.clone())?;
        info!(subnet = %subnet_id, block = block_number, "settlement confirmed");
        Ok(record)
    }

    /// Release a `Pending` record for a settlement cancelled before its
    /// first network submission. Nothing external happened, so the pair
    /// may be settled later as if this attempt never started.
    pub fn release_pending(&self, subnet_id: &SubnetId, block_number: u64) -> Result<()> {
        self.store.remove_pending(subnet_id, block_number)
    }

    /// Move a `Pending` record to `Failed`, recording which transaction
    /// index failed and the references submitted before the halt.
    pub fn record_failed(
        &self,
        subnet_id: SubnetId,
        block_number: u64,
        token: IdempotencyToken,
        failed_index: usize,
        submitted_refs: Vec<String>,
    ) -> Result<SettlementRecord> {
        let record = SettlementRecord {
            subnet_id,
            block_number,
            status: SettlementStatus::Failed,
            tx_refs: submitted_refs,
            idempotency_token: token,
            failed_index: Some(failed_index),
            updated_at: Utc::now(),
        };
        self.store.update(record.clone())?;
        warn!(
            subnet = %subnet_id,
            block = block_number,
            failed_index,
            "settlement failed; manual reconciliation required"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> SubnetId {
        SubnetId([1; 32])
    }

    fn token() -> IdempotencyToken {
        IdempotencyToken([3; 28])
    }

    fn service() -> ReplayProtection<InMemoryReplayStore> {
        ReplayProtection::new(InMemoryReplayStore::new())
    }

    #[test]
    fn fresh_pair_is_not_settled() {
        let replay = service();
        assert!(!replay.is_already_settled(&subnet(), 7));
        assert!(replay.existing_record(&subnet(), 7).is_none());
    }

    #[test]
    fn pending_is_not_terminal() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        assert!(!replay.is_already_settled(&subnet(), 7));
        let record = replay.existing_record(&subnet(), 7).unwrap();
        assert_eq!(record.status, SettlementStatus::Pending);
    }

    #[test]
    fn confirmed_pair_is_settled_with_refs() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay
            .record_confirmed(subnet(), 7, token(), vec!["tx-a".into(), "tx-b".into()])
            .unwrap();

        assert!(replay.is_already_settled(&subnet(), 7));
        let record = replay.existing_record(&subnet(), 7).unwrap();
        assert_eq!(record.status, SettlementStatus::Confirmed);
        assert_eq!(record.tx_refs, vec!["tx-a", "tx-b"]);
    }

    #[test]
    fn failed_pair_is_terminal_with_index() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay
            .record_failed(subnet(), 7, token(), 2, vec!["tx-a".into()])
            .unwrap();

        assert!(replay.is_already_settled(&subnet(), 7));
        let record = replay.existing_record(&subnet(), 7).unwrap();
        assert_eq!(record.status, SettlementStatus::Failed);
        assert_eq!(record.failed_index, Some(2));
    }

    #[test]
    fn double_pending_conflicts() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        let err = replay.record_pending(subnet(), 7, token()).unwrap_err();
        assert!(matches!(err, OpenSettleError::ReplayConflict { .. }));
    }

    #[test]
    fn terminal_records_cannot_be_rewritten() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay
            .record_confirmed(subnet(), 7, token(), vec!["tx-a".into()])
            .unwrap();

        let err = replay
            .record_failed(subnet(), 7, token(), 0, vec![])
            .unwrap_err();
        assert!(matches!(err, OpenSettleError::Internal(_)));

        // Original outcome untouched.
        let record = replay.existing_record(&subnet(), 7).unwrap();
        assert_eq!(record.status, SettlementStatus::Confirmed);
        assert_eq!(record.tx_refs, vec!["tx-a"]);
    }

    #[test]
    fn confirm_without_pending_fails() {
        let replay = service();
        let err = replay
            .record_confirmed(subnet(), 7, token(), vec![])
            .unwrap_err();
        assert!(matches!(err, OpenSettleError::Internal(_)));
    }

    #[test]
    fn release_pending_allows_a_later_attempt() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay.release_pending(&subnet(), 7).unwrap();
        assert!(replay.existing_record(&subnet(), 7).is_none());
        // The pair can start over.
        replay.record_pending(subnet(), 7, token()).unwrap();
    }

    #[test]
    fn release_refuses_terminal_records() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay
            .record_confirmed(subnet(), 7, token(), vec!["tx-a".into()])
            .unwrap();
        let err = replay.release_pending(&subnet(), 7).unwrap_err();
        assert!(matches!(err, OpenSettleError::Internal(_)));
    }

    #[test]
    fn blocks_are_independent() {
        let replay = service();
        replay.record_pending(subnet(), 7, token()).unwrap();
        replay
            .record_confirmed(subnet(), 7, token(), vec!["tx-a".into()])
            .unwrap();

        assert!(!replay.is_already_settled(&subnet(), 8));
        replay.record_pending(subnet(), 8, token()).unwrap();
    }
}
