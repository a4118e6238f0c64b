//! End-to-end settlement tests.
//!
//! These exercise the full settlement path: plan a committed withdrawal
//! queue, run pre-flight re-verification, sign, submit against a mock
//! network, and check the replay records — covering the happy path,
//! insolvency at execution time, replay protection, FX conversion,
//! partial-submission halts, retry, and cancellation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use opensettle_settlement::{
    CancelFlag, LocalSigner, MultisigOrchestrator, PathMarket, PathQuote, InMemoryReplayStore,
    SettlementNetwork, SettlementPlanner,
};
use opensettle_types::{
    Asset, OpenSettleError, Result, SettlementConfig, SettlementPlan, SettlementStatus,
    Sha256Hasher, SignedTransaction, SignerKey, SubnetId, TreasuryGateway, TreasurySnapshot,
    TxKind, UserId, WithdrawalId, WithdrawalIntent,
};

// =============================================================================
// Fixtures
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn asset_x() -> Asset {
    Asset::issued("X", [9; 32])
}

fn asset_y() -> Asset {
    Asset::issued("Y", [8; 32])
}

fn subnet() -> SubnetId {
    SubnetId([1; 32])
}

fn withdrawal(id: u8, user: u8, asset: &Asset, amount: i128) -> WithdrawalIntent {
    WithdrawalIntent {
        withdrawal_id: WithdrawalId([id; 32]),
        user_id: UserId([user; 32]),
        asset: asset.clone(),
        amount,
        destination: [7; 32],
    }
}

fn snapshot(holdings: &[(&Asset, u128)], signer_seeds: &[u8], threshold: usize) -> TreasurySnapshot {
    let mut balances = BTreeMap::new();
    for (asset, amount) in holdings {
        balances.insert(asset.id(&Sha256Hasher), *amount);
    }
    let signers: BTreeSet<SignerKey> = signer_seeds
        .iter()
        .map(|&seed| LocalSigner::from_seed([seed; 32]).public_key())
        .collect();
    TreasurySnapshot {
        balances,
        signers,
        threshold,
    }
}

struct StaticTreasury(TreasurySnapshot);

impl TreasuryGateway for StaticTreasury {
    async fn fetch_snapshot(&self) -> Result<TreasurySnapshot> {
        Ok(self.0.clone())
    }
}

/// Mock network: records every submitted envelope, optionally rejecting or
/// timing out specific submissions.
#[derive(Clone, Default)]
struct MockNetwork {
    submissions: Arc<Mutex<Vec<SignedTransaction>>>,
    /// Submission index (0-based, across all calls) that must be rejected.
    reject_at: Option<usize>,
    /// Number of leading submissions that time out before succeeding.
    timeouts_first: usize,
    calls: Arc<AtomicUsize>,
}

impl MockNetwork {
    fn submitted(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn envelopes(&self) -> Vec<SignedTransaction> {
        self.submissions.lock().unwrap().clone()
    }
}

impl SettlementNetwork for MockNetwork {
    async fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.timeouts_first {
            return Err(OpenSettleError::HorizonTimeout {
                context: format!("mock timeout on call {call}"),
            });
        }
        let mut submissions = self.submissions.lock().unwrap();
        if self.reject_at == Some(submissions.len()) {
            return Err(OpenSettleError::NetworkRejected {
                reason: "mock rejection".into(),
            });
        }
        submissions.push(tx.clone());
        Ok(format!("tx-{}", submissions.len()))
    }
}

/// Mock market quoting a fixed source amount from asset X.
#[derive(Clone)]
struct MockMarket {
    source_amount: u128,
    quotes_available: bool,
}

impl PathMarket for MockMarket {
    async fn strict_receive_paths(
        &self,
        source_assets: &[Asset],
        _dest_asset: &Asset,
        _dest_amount: u128,
    ) -> Result<Vec<PathQuote>> {
        if !self.quotes_available || source_assets.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![PathQuote {
            source_asset: source_assets[0].clone(),
            source_amount: self.source_amount,
            path: vec![],
        }])
    }
}

type Orchestrator = MultisigOrchestrator<
    Sha256Hasher,
    StaticTreasury,
    MockNetwork,
    MockMarket,
    InMemoryReplayStore,
>;

fn fast_config() -> SettlementConfig {
    SettlementConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        ..SettlementConfig::default()
    }
}

fn orchestrator(snapshot: TreasurySnapshot, network: MockNetwork, market: MockMarket) -> Orchestrator {
    MultisigOrchestrator::new(
        Sha256Hasher,
        StaticTreasury(snapshot),
        network,
        market,
        InMemoryReplayStore::new(),
        vec![
            LocalSigner::from_seed([1; 32]),
            LocalSigner::from_seed([2; 32]),
            LocalSigner::from_seed([3; 32]),
        ],
        vec![asset_x(), asset_y()],
        fast_config(),
    )
}

fn plan_for(withdrawals: &[WithdrawalIntent], treasury: &TreasurySnapshot) -> SettlementPlan {
    SettlementPlanner::new(Sha256Hasher, 100)
        .build_plan(subnet(), 7, withdrawals, treasury)
        .unwrap()
}

// =============================================================================
// Test: happy path — one asset, two users, one batch, one tx ref
// =============================================================================
#[tokio::test]
async fn happy_path_settles_one_batch() {
    init_tracing();
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![
        withdrawal(1, 1, &asset_x(), 1_000_000),
        withdrawal(2, 2, &asset_x(), 500_000),
    ];
    let plan = plan_for(&withdrawals, &snap);
    assert_eq!(plan.transactions.len(), 1);

    let network = MockNetwork::default();
    let mut orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let confirmed = Arc::new(AtomicUsize::new(0));
    let confirmed_clone = Arc::clone(&confirmed);
    orch.on_confirmation(move |confirmation| {
        assert_eq!(confirmation.block_number, 7);
        assert_eq!(confirmation.tx_refs.len(), 1);
        confirmed_clone.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SettlementStatus::Confirmed);
    assert_eq!(outcome.tx_refs, vec!["tx-1"]);
    assert_eq!(network.submitted(), 1);
    assert_eq!(confirmed.load(Ordering::SeqCst), 1);

    // The envelope carries exactly the threshold number of signatures.
    let envelope = &network.envelopes()[0];
    assert_eq!(envelope.signatures.len(), 2);
    assert_eq!(envelope.transaction.memo, plan.idempotency_token);
}

// =============================================================================
// Test: replay — second settlement of the same pair submits nothing
// =============================================================================
#[tokio::test]
async fn replay_returns_identical_refs_without_submitting() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let first = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(first.status, SettlementStatus::Confirmed);
    assert_eq!(network.submitted(), 1);
    assert!(orch.replay().is_already_settled(&subnet(), 7));

    let second = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(second.status, SettlementStatus::AlreadySettled);
    assert_eq!(second.tx_refs, first.tx_refs);
    // Zero new network submissions.
    assert_eq!(network.submitted(), 1);
}

// =============================================================================
// Test: solvency re-check at execution time
// =============================================================================
#[tokio::test]
async fn drained_treasury_fails_preflight() {
    // The plan was built when the treasury was solvent...
    let solvent = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000_000)];
    let plan = plan_for(&withdrawals, &solvent);

    // ...but by execution time it only holds 500,000.
    let drained = snapshot(&[(&asset_x(), 500_000)], &[1, 2], 2);
    let network = MockNetwork::default();
    let orch = orchestrator(drained, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpenSettleError::InsufficientTreasuryBalance {
            required: 1_000_000,
            available: 500_000,
            ..
        }
    ));
    assert_eq!(network.submitted(), 0);
    // Pre-flight failures leave no record behind.
    assert!(orch.replay().existing_record(&subnet(), 7).is_none());
}

// =============================================================================
// Test: PoM re-match failure fails closed
// =============================================================================
#[tokio::test]
async fn tampered_totals_fail_closed() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000_000)];
    let mut plan = plan_for(&withdrawals, &snap);

    // Tamper: totals claim less outflow than the queue demands.
    plan.totals_by_asset = [(asset_x().id(&Sha256Hasher), 999_999u128)]
        .into_iter()
        .collect();

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    match err {
        OpenSettleError::PomMismatch { detail } => {
            assert!(detail.contains("mismatch"), "detail: {detail}");
        }
        other => panic!("expected PomMismatch, got {other}"),
    }
    assert_eq!(network.submitted(), 0);
}

// =============================================================================
// Test: signer threshold
// =============================================================================
#[tokio::test]
async fn missing_signers_block_settlement() {
    // Treasury authorizes signers 8 and 9; we only hold keys 1-3.
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[8, 9], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpenSettleError::SignerThresholdNotMet {
            matching: 0,
            required: 2
        }
    ));
    assert_eq!(network.submitted(), 0);
}

// =============================================================================
// Test: partial submission halts the batch
// =============================================================================
#[tokio::test]
async fn mid_batch_failure_halts_remaining() {
    let snap = snapshot(&[(&asset_x(), 10_000), (&asset_y(), 10_000)], &[1, 2], 2);
    // Two assets -> two transactions, in asset-id order.
    let withdrawals = vec![
        withdrawal(1, 1, &asset_x(), 1_000),
        withdrawal(2, 2, &asset_y(), 2_000),
    ];
    let plan = plan_for(&withdrawals, &snap);
    assert_eq!(plan.transactions.len(), 2);

    let network = MockNetwork {
        reject_at: Some(1), // second submission is definitively rejected
        ..MockNetwork::default()
    };
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpenSettleError::PartialSubmission {
            failed_index: 1,
            submitted: 1,
            ..
        }
    ));

    // Only the first transaction reached the network.
    assert_eq!(network.submitted(), 1);
    let record = orch.replay().existing_record(&subnet(), 7).unwrap();
    assert_eq!(record.status, SettlementStatus::Failed);
    assert_eq!(record.failed_index, Some(1));
    assert_eq!(record.tx_refs, vec!["tx-1"]);
}

// =============================================================================
// Test: transient failures retry and then succeed
// =============================================================================
#[tokio::test]
async fn timeouts_are_retried_with_backoff() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork {
        timeouts_first: 2, // two timeouts, then success
        ..MockNetwork::default()
    };
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let outcome = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Confirmed);
    assert_eq!(network.calls.load(Ordering::SeqCst), 3);
    assert_eq!(network.submitted(), 1);
}

// =============================================================================
// Test: retry exhaustion escalates to Failed
// =============================================================================
#[tokio::test]
async fn exhausted_retries_mark_failed() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork {
        timeouts_first: usize::MAX, // never succeeds
        ..MockNetwork::default()
    };
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpenSettleError::PartialSubmission { failed_index: 0, .. }
    ));
    let record = orch.replay().existing_record(&subnet(), 7).unwrap();
    assert_eq!(record.status, SettlementStatus::Failed);
    assert!(record.tx_refs.is_empty());

    // A terminal Failed record short-circuits the next attempt.
    let outcome = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Failed);
}

// =============================================================================
// Test: FX conversion for an asset the treasury does not hold
// =============================================================================
#[tokio::test]
async fn unheld_asset_settles_through_conversion() {
    // Treasury holds X only; the withdrawal asks for Y.
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_y(), 2_000)];
    let plan = plan_for(&withdrawals, &snap);
    assert_eq!(plan.transactions[0].kind, TxKind::PathPayment);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 1_000,
        quotes_available: true,
    });

    let outcome = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Confirmed);

    let envelope = &network.envelopes()[0];
    let route = envelope.fx_route.as_ref().expect("fx route attached");
    assert_eq!(route.source_asset, asset_x());
    assert_eq!(route.estimate, 1_000);
    assert_eq!(route.send_max, 1_010); // 1% buffer
}

// =============================================================================
// Test: no conversion path fails that settlement after retries
// =============================================================================
#[tokio::test]
async fn missing_path_exhausts_retries_and_halts() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_y(), 2_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false, // market has no path
    });

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    match err {
        OpenSettleError::PartialSubmission {
            failed_index: 0,
            reason,
            ..
        } => assert!(reason.contains("OS_ERR_602"), "reason: {reason}"),
        other => panic!("expected PartialSubmission, got {other}"),
    }
    assert_eq!(network.submitted(), 0);
}

// =============================================================================
// Test: cancellation before the first submission
// =============================================================================
#[tokio::test]
async fn cancellation_before_submission_leaves_no_trace() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = orch.execute(&plan, &withdrawals, &cancel).await.unwrap_err();
    assert!(matches!(err, OpenSettleError::Cancelled));
    assert_eq!(network.submitted(), 0);
    assert!(orch.replay().existing_record(&subnet(), 7).is_none());

    // The pair settles normally afterwards.
    let outcome = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Confirmed);
}

// =============================================================================
// Test: the whole pipeline — ledger, commitment, plan, settle
// =============================================================================
#[tokio::test]
async fn full_pipeline_from_ledger_to_confirmation() {
    use ed25519_dalek::{Signer, SigningKey};
    use opensettle_commit::{CommitmentManager, InMemoryCommitmentStore};
    use opensettle_ledger::LedgerStore;
    use opensettle_types::{AuditorSignature, CommitmentProposal, SubnetPolicy};

    // Auditor keys double as treasury signers: seeds 1 and 2 match the
    // orchestrator's local signers.
    let auditor_keys: Vec<SigningKey> = vec![
        SigningKey::from_bytes(&[1; 32]),
        SigningKey::from_bytes(&[2; 32]),
    ];
    let auditor_pubs: Vec<SignerKey> = auditor_keys
        .iter()
        .map(|k| SignerKey::from_verifying_key(&k.verifying_key()))
        .collect();

    // Ledger: fund a user and queue a withdrawal.
    let mut ledger = LedgerStore::new(subnet(), Sha256Hasher);
    let user = UserId([5; 32]);
    ledger.credit(user, &asset_x(), 2_000_000).unwrap();
    ledger
        .request_withdrawal(WithdrawalId([1; 32]), user, &asset_x(), 1_500_000, [7; 32])
        .unwrap();
    let state_root = ledger.state_root().combined(&Sha256Hasher);
    let (queue, _) = ledger.seal_queue();

    // Commitment: threshold-signed proposal over the sealed state.
    let mut treasury_snapshot = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    treasury_snapshot.signers = auditor_pubs.iter().copied().collect();
    let mut manager = CommitmentManager::new(InMemoryCommitmentStore::new(), Sha256Hasher);
    manager.register_subnet(SubnetPolicy::new(subnet(), auditor_pubs.clone(), 2));

    let payload = CommitmentProposal::signing_payload(&subnet(), 1, &state_root);
    let proposal = CommitmentProposal {
        subnet_id: subnet(),
        block_number: 1,
        state_root,
        signatures: auditor_keys
            .iter()
            .map(|key| AuditorSignature {
                signer: SignerKey::from_verifying_key(&key.verifying_key()),
                signature: key.sign(&payload).to_bytes().to_vec(),
            })
            .collect(),
    };
    let gateway = StaticTreasury(treasury_snapshot.clone());
    let commitment = manager.propose(&gateway, &proposal, &queue).await.unwrap();
    assert_eq!(commitment.block_number, 1);

    // Settlement: plan the committed queue and execute it.
    let plan = SettlementPlanner::new(Sha256Hasher, 100)
        .build_plan(subnet(), commitment.block_number, &queue, &treasury_snapshot)
        .unwrap();
    let network = MockNetwork::default();
    let orch = orchestrator(treasury_snapshot, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    let outcome = orch
        .execute(&plan, &queue, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, SettlementStatus::Confirmed);
    assert_eq!(outcome.tx_refs.len(), 1);
    assert_eq!(network.submitted(), 1);
}

// =============================================================================
// Test: a crashed Pending settlement demands reconciliation
// =============================================================================
#[tokio::test]
async fn pending_record_blocks_new_attempts() {
    let snap = snapshot(&[(&asset_x(), 5_000_000)], &[1, 2], 2);
    let withdrawals = vec![withdrawal(1, 1, &asset_x(), 1_000)];
    let plan = plan_for(&withdrawals, &snap);

    let network = MockNetwork::default();
    let orch = orchestrator(snap, network.clone(), MockMarket {
        source_amount: 0,
        quotes_available: false,
    });

    // Simulate a crashed earlier attempt.
    orch.replay()
        .record_pending(subnet(), 7, plan.idempotency_token)
        .unwrap();

    let err = orch
        .execute(&plan, &withdrawals, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OpenSettleError::SettlementPending { .. }));
    assert_eq!(network.submitted(), 0);
}
