//! Treasury snapshot: the external, read-only fact that PoM validation and
//! settlement pre-flight check against.
//!
//! A snapshot is fetched fresh before every validation and again before
//! every settlement attempt — it is never cached across those two uses,
//! because the whole point of the second fetch is to observe treasury
//! drain that happened in between.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::asset::AssetId;
use crate::error::Result;
use crate::ids::SignerKey;

/// Read-only view of the real-asset treasury backing a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreasurySnapshot {
    /// Per-asset holdings, in the asset's smallest unit.
    pub balances: BTreeMap<AssetId, u128>,
    /// The treasury account's authorized signers.
    pub signers: BTreeSet<SignerKey>,
    /// Signature threshold required by the treasury account.
    pub threshold: usize,
}

impl TreasurySnapshot {
    /// Treasury holding for an asset. A missing entry counts as zero.
    #[must_use]
    pub fn balance_of(&self, asset_id: &AssetId) -> u128 {
        self.balances.get(asset_id).copied().unwrap_or(0)
    }

    /// Whether the treasury holds any amount of the asset.
    #[must_use]
    pub fn holds(&self, asset_id: &AssetId) -> bool {
        self.balance_of(asset_id) > 0
    }

    /// Whether the given key is an authorized treasury signer.
    #[must_use]
    pub fn is_signer(&self, key: &SignerKey) -> bool {
        self.signers.contains(key)
    }
}

impl fmt::Display for TreasurySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "treasury[{} assets, {} signers, threshold {}]",
            self.balances.len(),
            self.signers.len(),
            self.threshold
        )
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------
// {"balances": {"<asset_id_hex>": "<decimal_string>"}, "signers": ["<hex>"],
//  "threshold": n}

#[derive(Serialize, Deserialize)]
struct SnapshotWire {
    balances: BTreeMap<AssetId, String>,
    signers: Vec<String>,
    threshold: usize,
}

impl Serialize for TreasurySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = SnapshotWire {
            balances: self
                .balances
                .iter()
                .map(|(id, amount)| (*id, amount.to_string()))
                .collect(),
            signers: self.signers.iter().map(SignerKey::to_hex).collect(),
            threshold: self.threshold,
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TreasurySnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let wire = SnapshotWire::deserialize(deserializer)?;
        let mut balances = BTreeMap::new();
        for (id, amount) in wire.balances {
            let amount: u128 = amount
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid treasury amount: {amount}")))?;
            balances.insert(id, amount);
        }
        let mut signers = BTreeSet::new();
        for s in wire.signers {
            let key = SignerKey::from_hex(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid signer key hex: {s}")))?;
            signers.insert(key);
        }
        Ok(Self {
            balances,
            signers,
            threshold: wire.threshold,
        })
    }
}

// ---------------------------------------------------------------------------
// TreasuryGateway
// ---------------------------------------------------------------------------

/// Source of fresh treasury snapshots.
///
/// Implementations query the external custodian (Horizon in production, a
/// fixture in tests). Callers must fetch through this seam immediately
/// before using the snapshot — holding one across a validation/settlement
/// boundary defeats the re-check.
pub trait TreasuryGateway: Send + Sync {
    /// Fetch a fresh snapshot of treasury holdings, signers, and threshold.
    fn fetch_snapshot(&self) -> impl Future<Output = Result<TreasurySnapshot>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
