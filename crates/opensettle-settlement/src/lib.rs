//! # opensettle-settlement
//!
//! **Settlement Plane**: converts committed withdrawal queues into
//! external-ledger transactions — deterministically planned, re-verified,
//! threshold-signed, submitted with bounded retry, and replay-protected.
//!
//! ## Architecture
//!
//! 1. **SettlementPlanner**: deterministic batching of a committed queue
//!    into transactions carrying the (subnet, block) idempotency token
//! 2. **MultisigOrchestrator**: pre-flight re-verification (PoM re-match,
//!    fresh-snapshot solvency, signer threshold), then in-order signing
//!    and submission; halts on the first exhausted failure
//! 3. **ReplayProtection**: at-most-once settlement per (subnet, block)
//! 4. **FxEngine**: strict-receive conversion when a withdrawal's asset is
//!    not held by the treasury
//! 5. **HorizonGateway**: reqwest implementation of the network seams
//!
//! ## Flow
//!
//! ```text
//! CommitmentManager -> SettlementPlanner.build_plan
//!     -> MultisigOrchestrator.execute
//!         (ReplayProtection, TreasuryGateway, FxEngine, SettlementNetwork)
//!     -> SettlementConfirmation
//! ```
//!
//! ## Concurrency
//!
//! Planner and orchestrator share no mutable state between settlements:
//! spawn one task per (subnet, block) pair. Within one settlement,
//! transactions submit strictly in planner order — later transactions'
//! sequence numbers depend on earlier ones against the same source
//! account. There is no ordering guarantee between different settlements.

pub mod fx;
pub mod gateway;
pub mod horizon;
pub mod orchestrator;
pub mod planner;
pub mod replay;

pub use fx::FxEngine;
pub use gateway::{LocalSigner, PathMarket, PathQuote, SettlementNetwork};
pub use horizon::HorizonGateway;
pub use orchestrator::{CancelFlag, MultisigOrchestrator};
pub use planner::SettlementPlanner;
pub use replay::{InMemoryReplayStore, ReplayProtection, ReplayStore};
