//! Settlement plan, transaction, and record types.
//!
//! A settlement plan is the deterministic product of a committed
//! withdrawal queue: the same queue always yields the same transactions in
//! the same order, carrying the same idempotency token. Records track each
//! (subnet, block) settlement through its lifecycle and are owned
//! exclusively by replay protection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::hash::LedgerHasher;
use crate::ids::{SignerKey, SubnetId, WithdrawalId};
use crate::pom::PomDelta;

/// Domain prefix for settlement transaction signing payloads.
const TX_SIGNING_PREFIX: &[u8] = b"opensettle:tx:v1:";

// ---------------------------------------------------------------------------
// IdempotencyToken
// ---------------------------------------------------------------------------

/// Deterministic 28-byte replay-protection key, attached to every
/// transaction in a plan as the external-network memo:
/// `H(subnet_id_32B || block_number_be8)[..28]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(pub [u8; 28]);

impl IdempotencyToken {
    /// Derive the token for a (subnet, block) pair.
    #[must_use]
    pub fn derive(subnet_id: &SubnetId, block_number: u64, hasher: &dyn LedgerHasher) -> Self {
        let digest = hasher.digest(&[subnet_id.as_bytes(), &block_number.to_be_bytes()]);
        let mut token = [0u8; 28];
        token.copy_from_slice(&digest[..28]);
        Self(token)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 28] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memo:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// PaymentOp / SettlementTransaction
// ---------------------------------------------------------------------------

/// One payment operation inside a settlement transaction: deliver `amount`
/// of the transaction's asset to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOp {
    pub withdrawal_id: WithdrawalId,
    pub destination: [u8; 32],
    pub amount: i128,
}

/// How a transaction delivers its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Direct payment from treasury holdings of the delivered asset.
    Payment,
    /// Path payment: the treasury spends a different asset it holds and
    /// the market converts along a discovered path. Exactly one operation.
    PathPayment,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payment => write!(f, "PAYMENT"),
            Self::PathPayment => write!(f, "PATH_PAYMENT"),
        }
    }
}

/// A batch of withdrawals sharing one delivered asset, bounded by the
/// external network's per-transaction operation limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub kind: TxKind,
    /// The asset delivered to every destination in this transaction.
    pub asset: Asset,
    pub operations: Vec<PaymentOp>,
    /// Replay-protection memo; identical for every transaction in a plan.
    pub memo: IdempotencyToken,
}

impl SettlementTransaction {
    /// Canonical signing payload: a digest over kind, asset, memo, and
    /// every operation in order.
    #[must_use]
    pub fn signing_payload(&self, hasher: &dyn LedgerHasher) -> [u8; 32] {
        let kind_byte: [u8; 1] = match self.kind {
            TxKind::Payment => [0u8],
            TxKind::PathPayment => [1u8],
        };
        let op_count = (self.operations.len() as u64).to_be_bytes();
        let mut parts: Vec<&[u8]> = vec![
            TX_SIGNING_PREFIX,
            &kind_byte,
            self.asset.code.as_bytes(),
            &[0u8],
            self.asset.issuer.as_hash_bytes(),
            self.memo.as_bytes(),
            &op_count,
        ];
        let op_amounts: Vec<[u8; 16]> = self
            .operations
            .iter()
            .map(|op| op.amount.to_be_bytes())
            .collect();
        for (op, amount_be) in self.operations.iter().zip(&op_amounts) {
            parts.push(op.withdrawal_id.as_bytes());
            parts.push(&op.destination);
            parts.push(amount_be);
        }
        hasher.digest(&parts)
    }

    /// Total amount delivered by this transaction.
    #[must_use]
    pub fn delivered_total(&self) -> i128 {
        self.operations.iter().map(|op| op.amount).sum()
    }
}

// ---------------------------------------------------------------------------
// Signatures / signed envelope
// ---------------------------------------------------------------------------

/// One signer's ed25519 signature over a transaction's signing payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub signer: SignerKey,
    /// Raw ed25519 signature bytes (64).
    pub signature: Vec<u8>,
}

/// A conversion route attached to a path-payment transaction at execution
/// time. The destination amount is always exact; `send_max` bounds what the
/// treasury may spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxRoute {
    /// Treasury-held asset being spent.
    pub source_asset: Asset,
    /// Market estimate of the source amount at discovery time.
    pub estimate: u128,
    /// Buffered upper bound on the source amount.
    pub send_max: u128,
    /// Intermediate hops, excluding source and destination assets.
    pub path: Vec<Asset>,
}

/// The envelope submitted to the settlement network: the transaction, its
/// threshold signatures, and the conversion route if one was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: SettlementTransaction,
    pub fx_route: Option<FxRoute>,
    pub signatures: Vec<TransactionSignature>,
}

// ---------------------------------------------------------------------------
// SettlementPlan
// ---------------------------------------------------------------------------

/// The deterministic, batched settlement of one committed withdrawal
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub idempotency_token: IdempotencyToken,
    pub transactions: Vec<SettlementTransaction>,
    /// Recomputed independently from the same withdrawal set; used by the
    /// orchestrator's pre-flight cross-check, never trusted blindly.
    pub totals_by_asset: PomDelta,
}

// ---------------------------------------------------------------------------
// SettlementRecord / status
// ---------------------------------------------------------------------------

/// Lifecycle state of a (subnet, block) settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Written before the first submission attempt. A crash leaves this
    /// state behind for operator investigation.
    Pending,
    /// All transactions submitted and confirmed. Terminal.
    Confirmed,
    /// A transaction failed after exhausting retries. Terminal; requires
    /// manual reconciliation before any retry.
    Failed,
    /// Returned (never stored) when a prior terminal record short-circuits
    /// a settlement attempt.
    AlreadySettled,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Failed => write!(f, "FAILED"),
            Self::AlreadySettled => write!(f, "ALREADY_SETTLED"),
        }
    }
}

/// The stored record tracking one (subnet, block) settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub status: SettlementStatus,
    /// External transaction references, in submission order.
    pub tx_refs: Vec<String>,
    pub idempotency_token: IdempotencyToken,
    /// Index of the transaction that failed, for `Failed` records.
    pub failed_index: Option<usize>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// A fresh `Pending` record, written before the first submission.
    #[must_use]
    pub fn pending(
        subnet_id: SubnetId,
        block_number: u64,
        idempotency_token: IdempotencyToken,
    ) -> Self {
        Self {
            subnet_id,
            block_number,
            status: SettlementStatus::Pending,
            tx_refs: Vec::new(),
            idempotency_token,
            failed_index: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether this record forbids any further submission for its
    /// (subnet, block) pair.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SettlementStatus::Confirmed | SettlementStatus::Failed
        )
    }
}

// ---------------------------------------------------------------------------
// Confirmation / outcome
// ---------------------------------------------------------------------------

/// Produced exactly once per confirmed settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfirmation {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub tx_refs: Vec<String>,
    pub idempotency_token: IdempotencyToken,
    pub timestamp: DateTime<Utc>,
}

/// What a settlement attempt resolved to: a fresh confirmation, or the
/// recorded outcome of an earlier attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub status: SettlementStatus,
    pub tx_refs: Vec<String>,
    pub idempotency_token: IdempotencyToken,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
