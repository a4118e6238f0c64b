//! The commitment state machine.
//!
//! A proposal moves `Proposed -> {Committed | Rejected}` and the terminal
//! state is final. Gates run in order: monotonicity, non-zero root,
//! auditor signature threshold, PoM validation. Nothing is mutated before
//! the final compare-and-store, so any failure leaves prior state
//! untouched — there are no partial commits.
//!
//! Only one commitment can win per (subnet, block): the store's
//! compare-and-store on the block-number watermark is the optimistic lock
//! that serializes concurrent proposals.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use opensettle_types::{
    Commitment, CommitmentNotice, CommitmentProposal, LedgerHasher, OpenSettleError, Result,
    SubnetId, SubnetPolicy, TreasuryGateway, WithdrawalIntent, is_zero_hash,
};

use crate::store::CommitmentStore;
use crate::validator::PomValidator;

/// Handler invoked exactly once per successful transition to `Committed`.
pub type CommitmentHandler = Box<dyn Fn(&CommitmentNotice) + Send + Sync>;

/// Accepts commitment proposals and persists immutable commitments.
pub struct CommitmentManager<S: CommitmentStore, H: LedgerHasher> {
    store: S,
    validator: PomValidator<H>,
    policies: BTreeMap<SubnetId, SubnetPolicy>,
    handlers: Vec<CommitmentHandler>,
}

impl<S: CommitmentStore, H: LedgerHasher> CommitmentManager<S, H> {
    #[must_use]
    pub fn new(store: S, hasher: H) -> Self {
        Self {
            store,
            validator: PomValidator::new(hasher),
            policies: BTreeMap::new(),
            handlers: Vec::new(),
        }
    }

    /// Register the auditor policy for a subnet. Proposals for unknown
    /// subnets are rejected outright.
    pub fn register_subnet(&mut self, policy: SubnetPolicy) {
        self.policies.insert(policy.subnet_id, policy);
    }

    /// Register a commitment notification handler.
    ///
    /// Handlers run synchronously inside the successful `propose` call,
    /// after the commitment is persisted — no event bus in between, which
    /// keeps notification observable in plain synchronous tests.
    pub fn on_commitment(&mut self, handler: impl Fn(&CommitmentNotice) + Send + Sync + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drive a proposal through the state machine.
    ///
    /// A fresh treasury snapshot is fetched through `gateway` for the PoM
    /// check — snapshots are never reused across validations.
    ///
    /// # Errors
    /// Any gate failure rejects the proposal: [`OpenSettleError::StaleBlockNumber`],
    /// [`OpenSettleError::ZeroStateRoot`], [`OpenSettleError::AuditorThresholdNotMet`],
    /// [`OpenSettleError::PomRejected`], or [`OpenSettleError::UnknownSubnet`].
    pub async fn propose<G: TreasuryGateway>(
        &self,
        gateway: &G,
        proposal: &CommitmentProposal,
        withdrawals: &[WithdrawalIntent],
    ) -> Result<Commitment> {
        let policy = self
            .policies
            .get(&proposal.subnet_id)
            .ok_or(OpenSettleError::UnknownSubnet(proposal.subnet_id))?;

        // 1. Monotonicity pre-check. Cheap early reject; the store's
        //    compare-and-store re-checks atomically at persist time.
        if let Some(last) = self.store.last_committed_block(&proposal.subnet_id) {
            if proposal.block_number <= last {
                return Err(OpenSettleError::StaleBlockNumber {
                    proposed: proposal.block_number,
                    last_committed: last,
                });
            }
        }

        // 2. The zero sentinel commits to nothing.
        if is_zero_hash(&proposal.state_root) {
            return Err(OpenSettleError::ZeroStateRoot);
        }

        // 3. Auditor signature threshold.
        let valid = count_valid_signatures(proposal, policy);
        if valid < policy.threshold {
            warn!(
                subnet = %proposal.subnet_id,
                block = proposal.block_number,
                valid,
                required = policy.threshold,
                "proposal under-signed"
            );
            return Err(OpenSettleError::AuditorThresholdNotMet {
                valid,
                required: policy.threshold,
            });
        }

        // 4. PoM gate against a fresh snapshot.
        let snapshot = gateway.fetch_snapshot().await?;
        let verdict = self
            .validator
            .validate(withdrawals, &snapshot, &policy.auditors, policy.threshold)?;
        if !verdict.is_ok() {
            warn!(
                subnet = %proposal.subnet_id,
                block = proposal.block_number,
                %verdict,
                "proposal rejected by PoM check"
            );
            return Err(OpenSettleError::PomRejected { verdict });
        }

        // 5. Persist atomically; a concurrent winner surfaces here.
        let commitment = Commitment {
            subnet_id: proposal.subnet_id,
            block_number: proposal.block_number,
            state_root: proposal.state_root,
        };
        self.store.compare_and_store(&commitment)?;

        info!(
            subnet = %commitment.subnet_id,
            block = commitment.block_number,
            "commitment stored"
        );
        let notice = CommitmentNotice::from(&commitment);
        for handler in &self.handlers {
            handler(&notice);
        }
        Ok(commitment)
    }
}

/// Count distinct policy auditors with a valid ed25519 signature over the
/// proposal payload. Signatures from keys outside the auditor set, repeat
/// signatures from one auditor, and malformed signatures all count zero.
fn count_valid_signatures(proposal: &CommitmentProposal, policy: &SubnetPolicy) -> usize {
    let payload = proposal.payload();
    let mut seen = BTreeSet::new();
    let mut valid = 0;
    for entry in &proposal.signatures {
        if !policy.is_auditor(&entry.signer) || seen.contains(&entry.signer) {
            continue;
        }
        let Some(verifying_key) = entry.signer.verifying_key() else {
            debug!(signer = %entry.signer, "signer bytes are not a valid key");
            continue;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(&entry.signature) else {
            continue;
        };
        if verifying_key.verify_strict(&payload, &signature).is_ok() {
            seen.insert(entry.signer);
            valid += 1;
        }
    }
    valid
}
