//! # opensettle-ledger
//!
//! **Ledger Plane**: per-subnet balance bookkeeping, the withdrawal-intent
//! queue, and the deterministic state-root builder.
//!
//! ## Architecture
//!
//! The Ledger Plane sits between the execution ledger and the Commitment
//! Plane:
//! 1. **LedgerStore**: single-writer state machine holding per-(user, asset)
//!    balances and the current epoch's withdrawal queue
//! 2. **state_root**: pure functions canonicalizing balances/withdrawals
//!    into leaves and folding them into a Merkle-rooted [`StateRoot`]
//!
//! ## Flow
//!
//! ```text
//! execution ledger -> LedgerStore.credit/debit/request_withdrawal
//!                  -> state_root::compute_state_root -> CommitmentManager
//! ```
//!
//! The store applies mutations sequentially (`&mut self`); the state-root
//! builder is pure and safely callable in parallel across subnets.
//!
//! [`StateRoot`]: opensettle_types::StateRoot

pub mod state_root;
pub mod store;

pub use state_root::compute_state_root;
pub use store::LedgerStore;
