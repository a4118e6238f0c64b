//! Asset model: code + issuer, and the derived canonical asset identifier.
//!
//! An asset is either native to the settlement network or issued by a
//! 32-byte issuer account. The canonical key used everywhere else in the
//! engine is [`AssetId`]: the hash of the NUL-terminated code followed by
//! the issuer bytes (or the literal `NATIVE` for native assets), rendered
//! as lowercase hex on the wire.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::MAX_ASSET_CODE_LEN;
use crate::hash::LedgerHasher;

// ---------------------------------------------------------------------------
// AssetIssuer
// ---------------------------------------------------------------------------

/// The issuer of an asset: the settlement network itself, or a 32-byte
/// issuer account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum AssetIssuer {
    /// The network-native asset (no issuer account).
    Native,
    /// An asset issued by the given account.
    Issued([u8; 32]),
}

impl AssetIssuer {
    /// The bytes contributed to leaf hashes and asset-id derivation:
    /// the issuer account, or the literal `NATIVE`.
    #[must_use]
    pub fn as_hash_bytes(&self) -> &[u8] {
        match self {
            Self::Native => b"NATIVE",
            Self::Issued(bytes) => bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// An asset: short code plus issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Asset {
    /// Asset code, 1–12 characters (e.g., "USDC").
    pub code: String,
    /// The issuing account, or native.
    pub issuer: AssetIssuer,
}

impl Asset {
    #[must_use]
    pub fn new(code: impl Into<String>, issuer: AssetIssuer) -> Self {
        Self {
            code: code.into(),
            issuer,
        }
    }

    /// The network-native asset.
    #[must_use]
    pub fn native(code: impl Into<String>) -> Self {
        Self::new(code, AssetIssuer::Native)
    }

    /// An issued asset.
    #[must_use]
    pub fn issued(code: impl Into<String>, issuer: [u8; 32]) -> Self {
        Self::new(code, AssetIssuer::Issued(issuer))
    }

    /// Whether the code length is within the 1–12 character bound.
    #[must_use]
    pub fn code_is_valid(&self) -> bool {
        !self.code.is_empty() && self.code.len() <= MAX_ASSET_CODE_LEN
    }

    /// Derive the canonical asset identifier:
    /// `H(code_utf8 || 0x00 || issuer_bytes_or_"NATIVE")`.
    #[must_use]
    pub fn id(&self, hasher: &dyn LedgerHasher) -> AssetId {
        AssetId(hasher.digest(&[self.code.as_bytes(), &[0u8], self.issuer.as_hash_bytes()]))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issuer {
            AssetIssuer::Native => write!(f, "{}(native)", self.code),
            AssetIssuer::Issued(bytes) => {
                write!(f, "{}:{}", self.code, hex::encode(&bytes[..4]))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// Canonical 32-byte asset key, used as the map key in PoM deltas, treasury
/// snapshots, and settlement plans. Serializes as lowercase hex so JSON
/// maps keyed by asset id match the wire format directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid asset id hex: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
