//! # opensettle-types
//!
//! Shared types, errors, and configuration for the **OpenSettle**
//! Proof-of-Money settlement engine.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`SubnetId`], [`UserId`], [`WithdrawalId`], [`SignerKey`]
//! - **Hashing**: the [`LedgerHasher`] seam and its [`Sha256Hasher`] implementation
//! - **Asset model**: [`Asset`], [`AssetIssuer`], [`AssetId`]
//! - **Ledger model**: [`BalanceEntry`], [`WithdrawalIntent`]
//! - **Treasury model**: [`TreasurySnapshot`], the [`TreasuryGateway`] seam
//! - **PoM model**: [`PomDelta`], [`PomVerdict`]
//! - **Commitment model**: [`StateRoot`], [`Commitment`], [`CommitmentProposal`], [`CommitmentNotice`]
//! - **Settlement model**: [`SettlementPlan`], [`SettlementTransaction`], [`SettlementRecord`], [`IdempotencyToken`]
//! - **Configuration**: [`SettlementConfig`], [`SubnetPolicy`], [`HorizonConfig`]
//! - **Errors**: [`OpenSettleError`] with `OS_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod asset;
pub mod balance;
pub mod commitment;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod ids;
pub mod pom;
pub mod settlement;
pub mod treasury;
pub mod withdrawal;

// Re-export all primary types at crate root for ergonomic imports:
//   use opensettle_types::{Asset, WithdrawalIntent, PomDelta, ...};

pub use asset::*;
pub use balance::*;
pub use commitment::*;
pub use config::*;
pub use error::*;
pub use hash::*;
pub use ids::*;
pub use pom::*;
pub use settlement::*;
pub use treasury::*;
pub use withdrawal::*;

// Constants are accessed via `opensettle_types::constants::FOO`
// (not re-exported to avoid name collisions).
