//! Proof-of-Money validation.
//!
//! The validator decides whether a withdrawal queue may settle against the
//! treasury. All conditions are independent, pure, and read-only; checks
//! run in a FIXED order and only the first failure is reported:
//!
//! 1. **Constructibility** — every withdrawal can become an external
//!    transaction (positive amount, non-zero destination, 1–12 char code).
//!    Checked first because it is purely local and needs no snapshot.
//! 2. **Solvency** — per-asset net outflow is covered by the treasury
//!    snapshot; a missing treasury entry counts as zero.
//! 3. **Authorization** — enough subnet auditors are also treasury
//!    signers. Checked last so a malformed or insolvent queue is reported
//!    as such even when signers are also missing.

use opensettle_types::{
    LedgerHasher, OpenSettleError, PomDelta, PomVerdict, Result, SignerKey, TreasurySnapshot,
    WithdrawalIntent,
};

/// Stateless PoM validator. Holds only the hash seam used to derive asset
/// identifiers; safe to share and call in parallel across subnets.
#[derive(Debug, Clone, Copy)]
pub struct PomValidator<H: LedgerHasher> {
    hasher: H,
}

impl<H: LedgerHasher> PomValidator<H> {
    #[must_use]
    pub fn new(hasher: H) -> Self {
        Self { hasher }
    }

    /// Net per-asset outflow demanded by a withdrawal queue.
    ///
    /// Amounts accumulate as unsigned integers; overflow is a hard error,
    /// as is a non-positive amount (the queue invariant guarantees
    /// positive amounts, so a violation here means corrupted input).
    pub fn net_outflow(&self, withdrawals: &[WithdrawalIntent]) -> Result<PomDelta> {
        let mut delta = PomDelta::new();
        for intent in withdrawals {
            let amount = u128::try_from(intent.amount).map_err(|_| {
                OpenSettleError::InvalidAmount {
                    reason: format!(
                        "withdrawal {} has non-positive amount {}",
                        intent.withdrawal_id, intent.amount
                    ),
                }
            })?;
            delta.add(intent.asset.id(&self.hasher), amount)?;
        }
        Ok(delta)
    }

    /// Run the full PoM check over a withdrawal queue.
    ///
    /// Returns `Err` only for hard errors (outflow overflow); every policy
    /// outcome — including rejection — is a [`PomVerdict`].
    pub fn validate(
        &self,
        withdrawals: &[WithdrawalIntent],
        snapshot: &TreasurySnapshot,
        subnet_auditors: &[SignerKey],
        subnet_threshold: usize,
    ) -> Result<PomVerdict> {
        // 1. Constructibility.
        for intent in withdrawals {
            if let Some(reason) = intent.malformed_reason() {
                return Ok(PomVerdict::NonConstructible {
                    withdrawal_id: intent.withdrawal_id,
                    reason: reason.to_string(),
                });
            }
        }

        // 2. Solvency.
        let delta = self.net_outflow(withdrawals)?;
        for (asset_id, required) in delta.iter() {
            let available = snapshot.balance_of(asset_id);
            if available < *required {
                return Ok(PomVerdict::Insolvent {
                    asset_id: *asset_id,
                    required: *required,
                    available,
                });
            }
        }

        // 3. Authorization.
        let matching = subnet_auditors
            .iter()
            .filter(|auditor| snapshot.is_signer(auditor))
            .count();
        if matching < snapshot.threshold || matching < subnet_threshold {
            return Ok(PomVerdict::Unauthorized {
                matching,
                treasury_threshold: snapshot.threshold,
                subnet_threshold,
            });
        }

        Ok(PomVerdict::Ok)
    }
}
