//! State roots and commitments.
//!
//! A state root commits to a subnet's entire balance and withdrawal state
//! at a given nonce. A commitment binds a state root to a block number;
//! block numbers strictly increase per subnet and a stored commitment is
//! immutable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::LedgerHasher;
use crate::ids::{SignerKey, SubnetId};

/// Domain prefix for auditor signatures over a commitment proposal.
const COMMIT_SIGNING_PREFIX: &[u8] = b"opensettle:commit:v1:";

// ---------------------------------------------------------------------------
// StateRoot
// ---------------------------------------------------------------------------

/// The two Merkle roots plus the subnet nonce that together commit to one
/// epoch of ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRoot {
    pub balances_root: [u8; 32],
    pub withdrawals_root: [u8; 32],
    pub nonce: u64,
}

impl StateRoot {
    /// Collapse into the single 32-byte root a proposal carries:
    /// `H(balances_root || withdrawals_root || nonce_be8)`.
    #[must_use]
    pub fn combined(&self, hasher: &dyn LedgerHasher) -> [u8; 32] {
        hasher.digest(&[
            &self.balances_root,
            &self.withdrawals_root,
            &self.nonce.to_be_bytes(),
        ])
    }
}

impl fmt::Display for StateRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "root[bal:{} wd:{} nonce:{}]",
            hex::encode(&self.balances_root[..4]),
            hex::encode(&self.withdrawals_root[..4]),
            self.nonce
        )
    }
}

// ---------------------------------------------------------------------------
// Commitment
// ---------------------------------------------------------------------------

/// An immutable, stored commitment: the terminal `Committed` state of a
/// proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub state_root: [u8; 32],
}

// ---------------------------------------------------------------------------
// CommitmentProposal
// ---------------------------------------------------------------------------

/// An auditor's signature over a commitment proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorSignature {
    pub signer: SignerKey,
    /// Raw ed25519 signature bytes (64).
    pub signature: Vec<u8>,
}

/// A proposed commitment awaiting the `Proposed -> {Committed | Rejected}`
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentProposal {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub state_root: [u8; 32],
    pub signatures: Vec<AuditorSignature>,
}

impl CommitmentProposal {
    /// The exact bytes auditors sign:
    /// `"opensettle:commit:v1:" || subnet_id || block_number_be8 || state_root`.
    #[must_use]
    pub fn signing_payload(
        subnet_id: &SubnetId,
        block_number: u64,
        state_root: &[u8; 32],
    ) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(COMMIT_SIGNING_PREFIX.len() + 32 + 8 + 32);
        payload.extend_from_slice(COMMIT_SIGNING_PREFIX);
        payload.extend_from_slice(subnet_id.as_bytes());
        payload.extend_from_slice(&block_number.to_be_bytes());
        payload.extend_from_slice(state_root);
        payload
    }

    /// Signing payload for this proposal's own fields.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        Self::signing_payload(&self.subnet_id, self.block_number, &self.state_root)
    }
}

// ---------------------------------------------------------------------------
// CommitmentNotice
// ---------------------------------------------------------------------------

/// Notification fired exactly once per successful transition to
/// `Committed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentNotice {
    pub subnet_id: SubnetId,
    pub block_number: u64,
    pub state_root: [u8; 32],
}

impl From<&Commitment> for CommitmentNotice {
    fn from(c: &Commitment) -> Self {
        Self {
            subnet_id: c.subnet_id,
            block_number: c.block_number,
            state_root: c.state_root,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
