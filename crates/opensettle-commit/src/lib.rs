//! # opensettle-commit
//!
//! **Commitment Plane**: Proof-of-Money validation and the commitment
//! state machine.
//!
//! ## Architecture
//!
//! The Commitment Plane is the serialization point of the pipeline. For
//! each subnet it accepts proposed (block number, state root, signatures)
//! triples and either persists an immutable commitment or rejects the
//! proposal:
//!
//! 1. **PomValidator**: pure liquidity check — constructibility, solvency
//!    against a fresh treasury snapshot, auditor authorization
//! 2. **CommitmentStore**: atomic compare-and-store keyed by block number;
//!    the monotonicity check doubles as an optimistic lock
//! 3. **CommitmentManager**: the `Proposed -> {Committed | Rejected}`
//!    state machine, firing one notification per successful commit
//!
//! ## Flow
//!
//! ```text
//! StateRootBuilder -> CommitmentManager.propose
//!     -> auditor signature check -> TreasuryGateway.fetch_snapshot
//!     -> PomValidator.validate -> CommitmentStore.compare_and_store
//!     -> on_commitment handlers
//! ```

pub mod manager;
pub mod store;
pub mod validator;

pub use manager::CommitmentManager;
pub use store::{CommitmentStore, InMemoryCommitmentStore};
pub use validator::PomValidator;
