//! Proof-of-Money delta and verdict types.
//!
//! The PoM delta is the net per-asset outflow a withdrawal queue demands
//! from the treasury. It is the single ordered-map type used across the
//! whole core — the validator derives it, the planner recomputes it, and
//! the orchestrator cross-checks the two immediately before acting.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::asset::AssetId;
use crate::error::{OpenSettleError, Result};
use crate::ids::WithdrawalId;

// ---------------------------------------------------------------------------
// PomDelta
// ---------------------------------------------------------------------------

/// Net outflow per asset, derived solely from a withdrawal queue.
///
/// Iteration order is asset-id byte order, so two deltas built from the
/// same queue compare equal and render identically on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PomDelta(BTreeMap<AssetId, u128>);

impl PomDelta {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Accumulate outflow for an asset. Overflow is a hard error, never a
    /// wrap: a queue whose total exceeds `u128::MAX` cannot be settled.
    pub fn add(&mut self, asset_id: AssetId, amount: u128) -> Result<()> {
        let slot = self.0.entry(asset_id).or_insert(0);
        *slot = slot
            .checked_add(amount)
            .ok_or(OpenSettleError::AmountOverflow { asset_id })?;
        Ok(())
    }

    #[must_use]
    pub fn outflow_of(&self, asset_id: &AssetId) -> u128 {
        self.0.get(asset_id).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetId, &u128)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all outflows. Saturates at `u128::MAX`; [`Self::add`] already
    /// bounds each per-asset total.
    #[must_use]
    pub fn total(&self) -> u128 {
        self.0.values().fold(0u128, |acc, v| acc.saturating_add(*v))
    }

    /// Human-readable description of every way `other` differs from `self`:
    /// missing assets, extra assets, and amount mismatches. Empty when the
    /// deltas match exactly.
    #[must_use]
    pub fn discrepancies(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        for (asset_id, expected) in &self.0 {
            match other.0.get(asset_id) {
                None => out.push(format!("missing asset {asset_id}: expected {expected}")),
                Some(actual) if actual != expected => out.push(format!(
                    "amount mismatch for {asset_id}: expected {expected}, got {actual}"
                )),
                Some(_) => {}
            }
        }
        for (asset_id, actual) in &other.0 {
            if !self.0.contains_key(asset_id) {
                out.push(format!("unexpected asset {asset_id}: {actual}"));
            }
        }
        out
    }
}

impl FromIterator<(AssetId, u128)> for PomDelta {
    fn from_iter<T: IntoIterator<Item = (AssetId, u128)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// Wire format: JSON object mapping asset_id_hex -> decimal_string(amount).
impl Serialize for PomDelta {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire: BTreeMap<AssetId, String> = self
            .0
            .iter()
            .map(|(id, amount)| (*id, amount.to_string()))
            .collect();
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PomDelta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let wire = BTreeMap::<AssetId, String>::deserialize(deserializer)?;
        let mut inner = BTreeMap::new();
        for (id, amount) in wire {
            let amount: u128 = amount
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid outflow amount: {amount}")))?;
            inner.insert(id, amount);
        }
        Ok(Self(inner))
    }
}

// ---------------------------------------------------------------------------
// PomVerdict
// ---------------------------------------------------------------------------

/// Outcome of a PoM validation pass. Only the first violated condition is
/// reported; the validator's check order is fixed and documented at the
/// validator itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PomVerdict {
    /// All conditions hold; the commitment may settle.
    Ok,
    /// Net outflow for an asset exceeds the treasury holding.
    Insolvent {
        asset_id: AssetId,
        required: u128,
        available: u128,
    },
    /// A withdrawal cannot be turned into an external transaction.
    NonConstructible {
        withdrawal_id: WithdrawalId,
        reason: String,
    },
    /// Too few subnet auditors are authorized treasury signers.
    Unauthorized {
        matching: usize,
        treasury_threshold: usize,
        subnet_threshold: usize,
    },
}

impl PomVerdict {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for PomVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Insolvent {
                asset_id,
                required,
                available,
            } => write!(
                f,
                "INSOLVENT: asset {asset_id} requires {required}, treasury holds {available}"
            ),
            Self::NonConstructible {
                withdrawal_id,
                reason,
            } => write!(f, "NON_CONSTRUCTIBLE: {withdrawal_id}: {reason}"),
            Self::Unauthorized {
                matching,
                treasury_threshold,
                subnet_threshold,
            } => write!(
                f,
                "UNAUTHORIZED: {matching} matching signer(s), need treasury {treasury_threshold} and subnet {subnet_threshold}"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
