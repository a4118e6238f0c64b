//! External seams of the Settlement Plane.
//!
//! The settlement network and the conversion-path market are opaque
//! collaborators behind traits; production talks to a Horizon-style REST
//! API ([`crate::horizon`]), tests use fixtures. Local signing keys are
//! wrapped so the orchestrator never touches raw key material directly.

use ed25519_dalek::{Signer, SigningKey};

use opensettle_types::{
    Asset, LedgerHasher, Result, SignedTransaction, SignerKey, TransactionSignature,
};

// ---------------------------------------------------------------------------
// SettlementNetwork
// ---------------------------------------------------------------------------

/// Submission seam to the external settlement network.
pub trait SettlementNetwork: Send + Sync {
    /// Submit a signed transaction and wait for a definitive outcome.
    ///
    /// Resolves with the external transaction reference on success, or an
    /// error that is either a confirmed rejection
    /// ([`opensettle_types::OpenSettleError::NetworkRejected`]) or a
    /// timeout ([`opensettle_types::OpenSettleError::HorizonTimeout`]).
    /// A timeout means "outcome unknown", never "did not happen".
    fn submit(&self, tx: &SignedTransaction) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// PathMarket
// ---------------------------------------------------------------------------

/// A quoted conversion path delivering an exact destination amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuote {
    /// Treasury-held asset the path spends.
    pub source_asset: Asset,
    /// Estimated source amount at quote time.
    pub source_amount: u128,
    /// Intermediate hops, excluding source and destination assets.
    pub path: Vec<Asset>,
}

/// Strict-receive path discovery on the external market.
pub trait PathMarket: Send + Sync {
    /// Quote paths that deliver exactly `dest_amount` of `dest_asset`,
    /// spending one of `source_assets`. An empty result means no path
    /// exists right now.
    fn strict_receive_paths(
        &self,
        source_assets: &[Asset],
        dest_asset: &Asset,
        dest_amount: u128,
    ) -> impl Future<Output = Result<Vec<PathQuote>>> + Send;
}

// ---------------------------------------------------------------------------
// LocalSigner
// ---------------------------------------------------------------------------

/// A local ed25519 signing key available to the orchestrator.
pub struct LocalSigner {
    signing_key: SigningKey,
    public: SignerKey,
}

impl LocalSigner {
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        let public = SignerKey::from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            public,
        }
    }

    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    /// The public half, matched against the treasury snapshot's signer set.
    #[must_use]
    pub fn public_key(&self) -> SignerKey {
        self.public
    }

    /// Sign a transaction payload digest.
    #[must_use]
    pub fn sign(&self, payload: &[u8; 32]) -> TransactionSignature {
        TransactionSignature {
            signer: self.public,
            signature: self.signing_key.sign(payload).to_bytes().to_vec(),
        }
    }
}

/// Sign a transaction's canonical payload with each of `signers`, in order.
#[must_use]
pub fn sign_transaction(
    tx: &opensettle_types::SettlementTransaction,
    fx_route: Option<opensettle_types::FxRoute>,
    signers: &[&LocalSigner],
    hasher: &dyn LedgerHasher,
) -> SignedTransaction {
    let payload = tx.signing_payload(hasher);
    SignedTransaction {
        transaction: tx.clone(),
        fx_route,
        signatures: signers.iter().map(|s| s.sign(&payload)).collect(),
    }
}
