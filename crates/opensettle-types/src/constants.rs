//! System-wide constants for the OpenSettle settlement engine.

/// Maximum operations per external settlement transaction.
pub const MAX_OPS_PER_TRANSACTION: usize = 100;

/// Maximum asset code length in characters.
pub const MAX_ASSET_CODE_LEN: usize = 12;

/// Idempotency token length in bytes (external-network memo size).
pub const IDEMPOTENCY_TOKEN_LEN: usize = 28;

/// Default submission attempts per transaction (first try + retries).
pub const DEFAULT_SUBMIT_ATTEMPTS: u32 = 5;

/// Default base delay for exponential submission backoff (milliseconds).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Default cap on a single backoff delay (milliseconds).
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 8_000;

/// Default buffer applied to an FX send-amount estimate (percent).
pub const DEFAULT_FX_SEND_BUFFER_PERCENT: u32 = 1;

/// Default bound on FX price movement between discovery and execution
/// (percent).
pub const DEFAULT_MAX_SLIPPAGE_PERCENT: u32 = 1;

/// Default attempts when polling a submitted transaction for confirmation.
pub const DEFAULT_CONFIRM_POLL_ATTEMPTS: u32 = 30;

/// Default interval between confirmation polls (milliseconds).
pub const DEFAULT_CONFIRM_POLL_INTERVAL_MS: u64 = 2_000;

/// Default timeout for a single gateway HTTP request (milliseconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Smallest-unit scale of external-network amounts (7 decimal places).
pub const STROOPS_PER_UNIT: u64 = 10_000_000;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenSettle";
