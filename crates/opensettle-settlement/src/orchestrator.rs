//! Multisig settlement execution.
//!
//! The orchestrator never trusts the plan it is handed. Immediately before
//! acting it re-derives the PoM delta from the same withdrawal queue,
//! re-fetches the treasury snapshot, and re-counts authorized signers; any
//! discrepancy fails closed before a single signature is produced.
//!
//! Execution then walks the plan strictly in order — later transactions'
//! sequence numbers depend on earlier ones against the same treasury
//! account. Each transaction is signed by exactly the threshold number of
//! signers, submitted with bounded exponential-backoff retry for transient
//! failures, and recorded. The first transaction to exhaust its retries
//! halts everything after it: the settlement is marked `Failed` with the
//! failing index and handed to an operator, never silently resumed.
//!
//! FX (path-payment) transactions follow the same halt policy: a path or
//! slippage failure that survives retries stops the settlement exactly
//! like a direct transfer failure. Skip-and-continue would interleave
//! settled and unsettled withdrawals within one commitment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use opensettle_types::{
    Asset, FxRoute, LedgerHasher, OpenSettleError, Result, SettlementConfig,
    SettlementConfirmation, SettlementOutcome, SettlementPlan, SettlementStatus,
    SettlementTransaction, TreasuryGateway, TxKind, WithdrawalIntent,
};

use opensettle_commit::PomValidator;

use crate::fx::FxEngine;
use crate::gateway::{LocalSigner, PathMarket, SettlementNetwork, sign_transaction};
use crate::replay::{ReplayProtection, ReplayStore};

// ---------------------------------------------------------------------------
// CancelFlag
// ---------------------------------------------------------------------------

/// Cooperative cancellation for a settlement attempt.
///
/// Honored only until the first network submission; once anything has been
/// submitted the attempt runs to a definitive outcome, because a
/// submitted-but-unconfirmed transaction might still apply.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handler invoked once per confirmed settlement.
pub type ConfirmationHandler = Box<dyn Fn(&SettlementConfirmation) + Send + Sync>;

// ---------------------------------------------------------------------------
// MultisigOrchestrator
// ---------------------------------------------------------------------------

/// Executes settlement plans against the external network.
///
/// One orchestrator serves many settlements; it holds no per-settlement
/// state, so independent (subnet, block) pairs may run as concurrent
/// tasks over a shared (`Arc`'d) instance.
pub struct MultisigOrchestrator<H, G, N, M, R>
where
    H: LedgerHasher + Copy,
    G: TreasuryGateway,
    N: SettlementNetwork,
    M: PathMarket,
    R: ReplayStore,
{
    hasher: H,
    validator: PomValidator<H>,
    gateway: G,
    network: N,
    fx: FxEngine<M>,
    replay: ReplayProtection<R>,
    signers: Vec<LocalSigner>,
    /// The treasury's asset book: candidate source assets for conversions.
    treasury_assets: Vec<Asset>,
    config: SettlementConfig,
    confirmation_handlers: Vec<ConfirmationHandler>,
}

impl<H, G, N, M, R> MultisigOrchestrator<H, G, N, M, R>
where
    H: LedgerHasher + Copy,
    G: TreasuryGateway,
    N: SettlementNetwork,
    M: PathMarket,
    R: ReplayStore,
{
    #[must_use]
    pub fn new(
        hasher: H,
        gateway: G,
        network: N,
        market: M,
        replay_store: R,
        signers: Vec<LocalSigner>,
        treasury_assets: Vec<Asset>,
        config: SettlementConfig,
    ) -> Self {
        let fx = FxEngine::new(market, config.fx_send_buffer_percent);
        Self {
            hasher,
            validator: PomValidator::new(hasher),
            gateway,
            network,
            fx,
            replay: ReplayProtection::new(replay_store),
            signers,
            treasury_assets,
            config,
            confirmation_handlers: Vec::new(),
        }
    }

    /// Register a settlement confirmation handler, invoked synchronously
    /// after the `Confirmed` record is stored.
    pub fn on_confirmation(
        &mut self,
        handler: impl Fn(&SettlementConfirmation) + Send + Sync + 'static,
    ) {
        self.confirmation_handlers.push(Box::new(handler));
    }

    /// Access the replay protection service.
    pub fn replay(&self) -> &ReplayProtection<R> {
        &self.replay
    }

    /// Execute a settlement plan.
    ///
    /// `withdrawals` must be the same committed queue the plan was built
    /// from; the pre-flight re-match exists to catch any drift between the
    /// two.
    ///
    /// Returns the outcome: `Confirmed` with fresh references,
    /// `AlreadySettled` / `Failed` with the recorded references of an
    /// earlier attempt (zero new submissions), or an error.
    pub async fn execute(
        &self,
        plan: &SettlementPlan,
        withdrawals: &[WithdrawalIntent],
        cancel: &CancelFlag,
    ) -> Result<SettlementOutcome> {
        // Replay short-circuit: a terminal record answers without touching
        // the network; a Pending record means a crashed attempt that an
        // operator must reconcile first.
        if let Some(record) = self.replay.existing_record(&plan.subnet_id, plan.block_number) {
            return match record.status {
                SettlementStatus::Confirmed => {
                    info!(
                        subnet = %plan.subnet_id,
                        block = plan.block_number,
                        "already settled; returning recorded outcome"
                    );
                    Ok(SettlementOutcome {
                        status: SettlementStatus::AlreadySettled,
                        tx_refs: record.tx_refs,
                        idempotency_token: record.idempotency_token,
                    })
                }
                SettlementStatus::Failed => Ok(SettlementOutcome {
                    status: SettlementStatus::Failed,
                    tx_refs: record.tx_refs,
                    idempotency_token: record.idempotency_token,
                }),
                SettlementStatus::Pending | SettlementStatus::AlreadySettled => {
                    Err(OpenSettleError::SettlementPending {
                        subnet_id: plan.subnet_id,
                        block_number: plan.block_number,
                    })
                }
            };
        }

        // Pre-flight 1: PoM re-match. The plan's totals must equal the
        // delta recomputed from the queue right now — per asset, exactly.
        let expected = self.validator.net_outflow(withdrawals)?;
        let drift = expected.discrepancies(&plan.totals_by_asset);
        if !drift.is_empty() {
            warn!(
                subnet = %plan.subnet_id,
                block = plan.block_number,
                "PoM re-match failed; refusing to submit"
            );
            return Err(OpenSettleError::PomMismatch {
                detail: drift.join("; "),
            });
        }

        // Pre-flight 2: fresh snapshot, solvency per asset.
        let snapshot = self.gateway.fetch_snapshot().await?;
        for (asset_id, required) in expected.iter() {
            let available = snapshot.balance_of(asset_id);
            if available < *required {
                return Err(OpenSettleError::InsufficientTreasuryBalance {
                    asset_id: *asset_id,
                    required: *required,
                    available,
                });
            }
        }

        // Pre-flight 3: signer threshold. Sign with exactly the threshold
        // number of authorized signers, never more.
        let mut authorized: Vec<&LocalSigner> = self
            .signers
            .iter()
            .filter(|signer| snapshot.is_signer(&signer.public_key()))
            .collect();
        if authorized.len() < snapshot.threshold {
            return Err(OpenSettleError::SignerThresholdNotMet {
                matching: authorized.len(),
                required: snapshot.threshold,
            });
        }
        authorized.truncate(snapshot.threshold);

        // Conversion source candidates: configured book ∩ snapshot holdings.
        let held_assets: Vec<Asset> = self
            .treasury_assets
            .iter()
            .filter(|asset| snapshot.holds(&asset.id(&self.hasher)))
            .cloned()
            .collect();

        if cancel.is_cancelled() {
            return Err(OpenSettleError::Cancelled);
        }

        // Commit to the attempt: the Pending record lands before any
        // submission so a crash from here on is detectable.
        self.replay
            .record_pending(plan.subnet_id, plan.block_number, plan.idempotency_token)?;

        let mut tx_refs: Vec<String> = Vec::with_capacity(plan.transactions.len());
        let mut submitted_any = false;
        for (index, tx) in plan.transactions.iter().enumerate() {
            match self
                .submit_with_retry(index, tx, &authorized, &held_assets, cancel, &mut submitted_any)
                .await
            {
                Ok(tx_ref) => tx_refs.push(tx_ref),
                Err(OpenSettleError::Cancelled) if !submitted_any => {
                    self.replay
                        .release_pending(&plan.subnet_id, plan.block_number)?;
                    return Err(OpenSettleError::Cancelled);
                }
                Err(err) => {
                    // Halt: do not attempt subsequent transactions.
                    self.replay.record_failed(
                        plan.subnet_id,
                        plan.block_number,
                        plan.idempotency_token,
                        index,
                        tx_refs.clone(),
                    )?;
                    return Err(OpenSettleError::PartialSubmission {
                        failed_index: index,
                        submitted: tx_refs.len(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.replay.record_confirmed(
            plan.subnet_id,
            plan.block_number,
            plan.idempotency_token,
            tx_refs.clone(),
        )?;

        let confirmation = SettlementConfirmation {
            subnet_id: plan.subnet_id,
            block_number: plan.block_number,
            tx_refs: tx_refs.clone(),
            idempotency_token: plan.idempotency_token,
            timestamp: Utc::now(),
        };
        for handler in &self.confirmation_handlers {
            handler(&confirmation);
        }

        Ok(SettlementOutcome {
            status: SettlementStatus::Confirmed,
            tx_refs,
            idempotency_token: plan.idempotency_token,
        })
    }

    /// Submit one transaction with bounded exponential-backoff retry.
    /// Only transient failures retry; a definitive rejection returns on
    /// the first attempt.
    async fn submit_with_retry(
        &self,
        index: usize,
        tx: &SettlementTransaction,
        signers: &[&LocalSigner],
        held_assets: &[Asset],
        cancel: &CancelFlag,
        submitted_any: &mut bool,
    ) -> Result<String> {
        // The first quote for a converted transaction becomes the
        // slippage baseline for its retries.
        let mut fx_baseline: Option<u128> = None;
        let mut last_err: Option<OpenSettleError> = None;

        for attempt in 0..self.config.submit_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
            match self
                .attempt_once(tx, signers, held_assets, &mut fx_baseline, cancel, submitted_any)
                .await
            {
                Ok(tx_ref) => return Ok(tx_ref),
                Err(err) if err.is_transient() => {
                    warn!(
                        index,
                        attempt,
                        error = %err,
                        "transient submission failure; will retry"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            OpenSettleError::Internal("retry loop exhausted without an error".into())
        }))
    }

    async fn attempt_once(
        &self,
        tx: &SettlementTransaction,
        signers: &[&LocalSigner],
        held_assets: &[Asset],
        fx_baseline: &mut Option<u128>,
        cancel: &CancelFlag,
        submitted_any: &mut bool,
    ) -> Result<String> {
        let fx_route = match tx.kind {
            TxKind::Payment => None,
            TxKind::PathPayment => Some(
                self.discover_fx_route(tx, held_assets, fx_baseline).await?,
            ),
        };

        // Last exit before the network: once submit is called the outcome
        // must be awaited, so cancellation stops mattering.
        if !*submitted_any && cancel.is_cancelled() {
            return Err(OpenSettleError::Cancelled);
        }

        let signed = sign_transaction(tx, fx_route, signers, &self.hasher);
        *submitted_any = true;
        self.network.submit(&signed).await
    }

    async fn discover_fx_route(
        &self,
        tx: &SettlementTransaction,
        held_assets: &[Asset],
        fx_baseline: &mut Option<u128>,
    ) -> Result<FxRoute> {
        let dest_amount = u128::try_from(tx.delivered_total()).map_err(|_| {
            OpenSettleError::InvalidAmount {
                reason: "path payment delivers a non-positive total".into(),
            }
        })?;
        let route = self
            .fx
            .discover_route(held_assets, &tx.asset, dest_amount)
            .await?;

        match *fx_baseline {
            None => {
                *fx_baseline = Some(route.estimate);
                Ok(route)
            }
            Some(expected)
                if FxEngine::<M>::validate_slippage(
                    expected,
                    route.estimate,
                    self.config.max_slippage_percent,
                ) =>
            {
                Ok(route)
            }
            Some(expected) => Err(OpenSettleError::SlippageExceeded {
                expected,
                actual: route.estimate,
                max_percent: self.config.max_slippage_percent,
            }),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        Duration::from_millis(exp.min(self.config.backoff_cap_ms))
    }
}
