//! Error types for the OpenSettle settlement engine.
//!
//! All errors use the `OS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Ledger errors
//! - 2xx: Commitment errors
//! - 5xx: Settlement errors
//! - 6xx: Network / FX errors
//! - 9xx: General / internal errors
//!
//! Every halt condition carries the specific asset/amount/signer
//! discrepancy so an operator can reconcile without re-deriving the
//! computation from logs.

use thiserror::Error;

use crate::asset::AssetId;
use crate::ids::{SubnetId, WithdrawalId};
use crate::pom::PomVerdict;

/// Central error enum for all OpenSettle operations.
#[derive(Debug, Error)]
pub enum OpenSettleError {
    // =================================================================
    // Ledger Errors (1xx)
    // =================================================================
    /// A debit would take a balance below zero. Debits are rejected,
    /// never clamped.
    #[error("OS_ERR_100: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i128, available: i128 },

    /// An amount failed validation (non-positive credit, malformed
    /// withdrawal, etc.).
    #[error("OS_ERR_101: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// A withdrawal with this ID is already queued.
    #[error("OS_ERR_102: Duplicate withdrawal: {0}")]
    DuplicateWithdrawal(WithdrawalId),

    /// Net-outflow accumulation overflowed for an asset.
    #[error("OS_ERR_103: Outflow overflow for asset {asset_id}")]
    AmountOverflow { asset_id: AssetId },

    // =================================================================
    // Commitment Errors (2xx)
    // =================================================================
    /// Proposed block number is not strictly greater than the last
    /// committed block for the subnet.
    #[error(
        "OS_ERR_200: Stale block number: proposed {proposed}, last committed {last_committed}"
    )]
    StaleBlockNumber { proposed: u64, last_committed: u64 },

    /// The proposal carries the zero-hash sentinel as its state root.
    #[error("OS_ERR_201: Zero state root")]
    ZeroStateRoot,

    /// Too few valid auditor signatures on the proposal.
    #[error("OS_ERR_202: Auditor threshold not met: {valid} valid signature(s), need {required}")]
    AuditorThresholdNotMet { valid: usize, required: usize },

    /// PoM validation did not return OK. Never retried automatically;
    /// requires a new, corrected withdrawal set.
    #[error("OS_ERR_203: Commitment rejected by PoM check: {verdict}")]
    PomRejected { verdict: PomVerdict },

    /// A concurrent proposal won the compare-and-store race.
    #[error("OS_ERR_204: Commitment conflict for {subnet_id} block {block_number}")]
    CommitmentConflict {
        subnet_id: SubnetId,
        block_number: u64,
    },

    /// No policy is registered for the subnet.
    #[error("OS_ERR_205: Unknown subnet: {0}")]
    UnknownSubnet(SubnetId),

    // =================================================================
    // Settlement Errors (5xx)
    // =================================================================
    /// The plan's totals disagree with the PoM delta recomputed at
    /// execution time. Fail closed; never submit.
    #[error("OS_ERR_500: PoM delta mismatch: {detail}")]
    PomMismatch { detail: String },

    /// Fresh treasury snapshot no longer covers the delta.
    #[error(
        "OS_ERR_501: Insufficient treasury balance for {asset_id}: need {required}, have {available}"
    )]
    InsufficientTreasuryBalance {
        asset_id: AssetId,
        required: u128,
        available: u128,
    },

    /// Too few local signers are authorized by the treasury.
    #[error("OS_ERR_502: Signer threshold not met: {matching} matching, need {required}")]
    SignerThresholdNotMet { matching: usize, required: usize },

    /// A transaction failed mid-batch after exhausting retries; remaining
    /// transactions were not attempted. Requires manual reconciliation.
    #[error(
        "OS_ERR_503: Partial submission: transaction {failed_index} failed after {submitted} submitted: {reason}"
    )]
    PartialSubmission {
        failed_index: usize,
        submitted: usize,
        reason: String,
    },

    /// A Pending record exists for this (subnet, block) — a previous
    /// attempt crashed mid-settlement and must be investigated.
    #[error(
        "OS_ERR_504: Settlement already pending for {subnet_id} block {block_number}; reconcile before retrying"
    )]
    SettlementPending {
        subnet_id: SubnetId,
        block_number: u64,
    },

    /// A concurrent caller raced this one to the replay store.
    #[error("OS_ERR_505: Replay record conflict for {subnet_id} block {block_number}")]
    ReplayConflict {
        subnet_id: SubnetId,
        block_number: u64,
    },

    /// The settlement was cancelled before its first network submission.
    #[error("OS_ERR_506: Settlement cancelled before submission")]
    Cancelled,

    // =================================================================
    // Network / FX Errors (6xx)
    // =================================================================
    /// The settlement network did not produce a definitive outcome in
    /// time. Never treated as "did not happen".
    #[error("OS_ERR_600: Horizon timeout: {context}")]
    HorizonTimeout { context: String },

    /// The network definitively rejected a submission.
    #[error("OS_ERR_601: Network rejected submission: {reason}")]
    NetworkRejected { reason: String },

    /// No conversion path delivers the destination asset.
    #[error("OS_ERR_602: No conversion path found for {asset}")]
    PathNotFound { asset: String },

    /// The market moved past the slippage bound between discovery and
    /// execution.
    #[error(
        "OS_ERR_603: Slippage exceeded: expected {expected}, current {actual}, bound {max_percent}%"
    )]
    SlippageExceeded {
        expected: u128,
        actual: u128,
        max_percent: u32,
    },

    /// HTTP transport failure talking to the gateway.
    #[error("OS_ERR_604: Transport error: {reason}")]
    Transport { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("OS_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("OS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.).
    #[error("OS_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("OS_ERR_903: I/O error: {0}")]
    Io(String),
}

impl OpenSettleError {
    /// Whether this failure may be retried with backoff. Everything else
    /// halts: PoM rejections need a corrected withdrawal set, pre-flight
    /// failures need operator action, and a definitive network rejection
    /// will not change on a second attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HorizonTimeout { .. }
                | Self::Transport { .. }
                | Self::PathNotFound { .. }
                | Self::SlippageExceeded { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OpenSettleError>;

impl From<std::io::Error> for OpenSettleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OpenSettleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = OpenSettleError::ZeroStateRoot;
        assert!(format!("{err}").starts_with("OS_ERR_201"));
    }

    #[test]
    fn insufficient_balance_names_amounts() {
        let err = OpenSettleError::InsufficientBalance {
            needed: 100,
            available: 50,
        };
        let msg = format!("{err}");
        assert!(msg.contains("OS_ERR_100"));
        assert!(msg.contains("100") && msg.contains("50"));
    }

    #[test]
    fn pom_rejection_carries_verdict_detail() {
        let err = OpenSettleError::PomRejected {
            verdict: PomVerdict::Insolvent {
                asset_id: AssetId([1; 32]),
                required: 1_000_000,
                available: 500_000,
            },
        };
        let msg = format!("{err}");
        assert!(msg.contains("INSOLVENT"));
        assert!(msg.contains("1000000"));
    }

    #[test]
    fn transient_classification() {
        assert!(
            OpenSettleError::HorizonTimeout {
                context: "submit".into()
            }
            .is_transient()
        );
        assert!(
            OpenSettleError::PathNotFound {
                asset: "USDC".into()
            }
            .is_transient()
        );
        assert!(
            !OpenSettleError::NetworkRejected {
                reason: "bad seq".into()
            }
            .is_transient()
        );
        assert!(
            !OpenSettleError::PomMismatch {
                detail: "x".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn all_errors_have_os_err_prefix() {
        let errors: Vec<OpenSettleError> = vec![
            OpenSettleError::ZeroStateRoot,
            OpenSettleError::Cancelled,
            OpenSettleError::Internal("test".into()),
            OpenSettleError::StaleBlockNumber {
                proposed: 1,
                last_committed: 2,
            },
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(msg.starts_with("OS_ERR_"), "missing prefix: {msg}");
        }
    }
}
