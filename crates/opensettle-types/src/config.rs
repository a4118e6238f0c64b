//! Configuration types for OpenSettle components.

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::ids::{SignerKey, SubnetId};

/// Settlement execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Maximum operations per external transaction.
    pub max_ops_per_transaction: usize,
    /// Submission attempts per transaction (first try + retries).
    pub submit_attempts: u32,
    /// Base delay for exponential backoff between attempts (ms).
    pub backoff_base_ms: u64,
    /// Cap on a single backoff delay (ms).
    pub backoff_cap_ms: u64,
    /// Buffer applied to FX send-amount estimates (percent).
    pub fx_send_buffer_percent: u32,
    /// Bound on FX price movement between discovery and execution (percent).
    pub max_slippage_percent: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_ops_per_transaction: constants::MAX_OPS_PER_TRANSACTION,
            submit_attempts: constants::DEFAULT_SUBMIT_ATTEMPTS,
            backoff_base_ms: constants::DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: constants::DEFAULT_BACKOFF_CAP_MS,
            fx_send_buffer_percent: constants::DEFAULT_FX_SEND_BUFFER_PERCENT,
            max_slippage_percent: constants::DEFAULT_MAX_SLIPPAGE_PERCENT,
        }
    }
}

/// Per-subnet commitment policy: which auditors may sign state roots and
/// how many must agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetPolicy {
    pub subnet_id: SubnetId,
    /// Auditors whose signatures count toward the threshold.
    pub auditors: Vec<SignerKey>,
    /// Minimum valid auditor signatures for a commitment.
    pub threshold: usize,
}

impl SubnetPolicy {
    #[must_use]
    pub fn new(subnet_id: SubnetId, auditors: Vec<SignerKey>, threshold: usize) -> Self {
        Self {
            subnet_id,
            auditors,
            threshold,
        }
    }

    /// Whether a key belongs to this subnet's auditor set.
    #[must_use]
    pub fn is_auditor(&self, key: &SignerKey) -> bool {
        self.auditors.contains(key)
    }
}

/// Connection parameters for a Horizon-style settlement network gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonConfig {
    /// Base URL, e.g. `https://horizon.example.org`.
    pub base_url: String,
    /// The treasury (anchor) account whose balances and signers form the
    /// snapshot.
    pub treasury_account: String,
    /// Timeout for a single HTTP request (ms).
    pub request_timeout_ms: u64,
    /// Attempts when polling a submitted transaction for confirmation.
    pub confirm_poll_attempts: u32,
    /// Interval between confirmation polls (ms).
    pub confirm_poll_interval_ms: u64,
}

impl HorizonConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, treasury_account: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            treasury_account: treasury_account.into(),
            request_timeout_ms: constants::DEFAULT_REQUEST_TIMEOUT_MS,
            confirm_poll_attempts: constants::DEFAULT_CONFIRM_POLL_ATTEMPTS,
            confirm_poll_interval_ms: constants::DEFAULT_CONFIRM_POLL_INTERVAL_MS,
        }
    }
}
