//! Horizon-style REST gateway.
//!
//! Implements the [`TreasuryGateway`], [`SettlementNetwork`], and
//! [`PathMarket`] seams against a Horizon-compatible API:
//!
//! - `GET /accounts/{id}` — treasury balances, signers, and thresholds
//! - `POST /transactions` — submission, followed by confirmation polling
//!   of `GET /transactions/{hash}` until a definitive status
//! - `GET /paths/strict-receive` — conversion path quotes
//!
//! Horizon renders amounts as 7-decimal-place strings; this module owns
//! the conversion between those and the integer (stroop-scale) amounts
//! used everywhere else.

use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info};

use opensettle_types::{
    Asset, HorizonConfig, LedgerHasher, OpenSettleError, Result, SignedTransaction, SignerKey,
    TreasuryGateway, TreasurySnapshot, constants,
};

use crate::gateway::{PathMarket, PathQuote, SettlementNetwork};

/// Gateway to a Horizon-compatible settlement network endpoint.
///
/// `asset_book` maps the asset codes the treasury account is known to
/// hold onto full [`Asset`] values (code + issuer); balances and path
/// quotes for codes outside the book are ignored.
pub struct HorizonGateway<H: LedgerHasher> {
    http: Client,
    config: HorizonConfig,
    asset_book: Vec<Asset>,
    hasher: H,
}

impl<H: LedgerHasher> HorizonGateway<H> {
    pub fn new(config: HorizonConfig, asset_book: Vec<Asset>, hasher: H) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OpenSettleError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            config,
            asset_book,
            hasher,
        })
    }

    fn book_lookup(&self, code: &str, native: bool) -> Option<&Asset> {
        self.asset_book.iter().find(|asset| {
            if native {
                matches!(asset.issuer, opensettle_types::AssetIssuer::Native)
            } else {
                asset.code == code
            }
        })
    }

    async fn get_json(&self, url: &str, context: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(context, &e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(context, %status, "horizon returned error: {body}");
            return Err(OpenSettleError::Transport {
                reason: format!("{context}: HTTP {status}"),
            });
        }
        response
            .json()
            .await
            .map_err(|e| OpenSettleError::Serialization(e.to_string()))
    }

    /// Poll a submitted transaction until Horizon reports a definitive
    /// status. `NOT_FOUND` keeps polling — a submitted transaction that
    /// has not yet appeared might still apply.
    async fn wait_for_transaction(&self, tx_hash: &str) -> Result<String> {
        let url = format!("{}/transactions/{tx_hash}", self.config.base_url);
        for attempt in 0..self.config.confirm_poll_attempts {
            let body = self.get_json(&url, "confirmation poll").await;
            match body {
                Ok(value) => match value["status"].as_str().unwrap_or("NOT_FOUND") {
                    "SUCCESS" => {
                        info!(tx_hash, attempt, "transaction confirmed");
                        return Ok(tx_hash.to_string());
                    }
                    "FAILED" => {
                        return Err(OpenSettleError::NetworkRejected {
                            reason: format!(
                                "transaction {tx_hash} failed: {}",
                                value["result_code"].as_str().unwrap_or("unknown")
                            ),
                        });
                    }
                    status => {
                        debug!(tx_hash, attempt, status, "transaction not yet confirmed");
                    }
                },
                // The submission already happened; a flaky poll must not
                // surface as a rejection.
                Err(err) => debug!(tx_hash, attempt, error = %err, "poll attempt failed"),
            }
            tokio::time::sleep(std::time::Duration::from_millis(
                self.config.confirm_poll_interval_ms,
            ))
            .await;
        }
        Err(OpenSettleError::HorizonTimeout {
            context: format!("transaction {tx_hash} unconfirmed after polling"),
        })
    }
}

impl<H: LedgerHasher> TreasuryGateway for HorizonGateway<H> {
    async fn fetch_snapshot(&self) -> Result<TreasurySnapshot> {
        let url = format!(
            "{}/accounts/{}",
            self.config.base_url, self.config.treasury_account
        );
        let body = self.get_json(&url, "treasury snapshot").await?;

        let mut snapshot = TreasurySnapshot::default();
        if let Some(balances) = body["balances"].as_array() {
            for entry in balances {
                let native = entry["asset_type"].as_str() == Some("native");
                let code = entry["asset_code"].as_str().unwrap_or_default();
                let Some(asset) = self.book_lookup(code, native) else {
                    continue;
                };
                let amount = from_network_amount(entry["balance"].as_str().unwrap_or("0"))?;
                snapshot
                    .balances
                    .insert(asset.id(&self.hasher), amount);
            }
        }
        if let Some(signers) = body["signers"].as_array() {
            for entry in signers {
                if let Some(key) = entry["key"].as_str().and_then(SignerKey::from_hex) {
                    snapshot.signers.insert(key);
                }
            }
        }
        snapshot.threshold = usize::try_from(
            body["thresholds"]["med_threshold"].as_u64().unwrap_or(1),
        )
        .unwrap_or(1);

        debug!(%snapshot, "treasury snapshot fetched");
        Ok(snapshot)
    }
}

impl<H: LedgerHasher> SettlementNetwork for HorizonGateway<H> {
    async fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        let url = format!("{}/transactions", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(tx)
            .send()
            .await
            .map_err(|e| classify_transport("transaction submission", &e))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OpenSettleError::Serialization(e.to_string()))?;
        if !status.is_success() {
            return Err(OpenSettleError::NetworkRejected {
                reason: format!(
                    "HTTP {status}: {}",
                    body["detail"].as_str().unwrap_or("unknown")
                ),
            });
        }

        let tx_hash = body["hash"]
            .as_str()
            .ok_or_else(|| OpenSettleError::Serialization("missing hash in response".into()))?
            .to_string();
        self.wait_for_transaction(&tx_hash).await
    }
}

impl<H: LedgerHasher> PathMarket for HorizonGateway<H> {
    async fn strict_receive_paths(
        &self,
        source_assets: &[Asset],
        dest_asset: &Asset,
        dest_amount: u128,
    ) -> Result<Vec<PathQuote>> {
        let source_codes: Vec<&str> =
            source_assets.iter().map(|a| a.code.as_str()).collect();
        let url = format!(
            "{}/paths/strict-receive?destination_asset_code={}&destination_amount={}&source_assets={}",
            self.config.base_url,
            dest_asset.code,
            to_network_amount(dest_amount)?,
            source_codes.join(","),
        );
        let body = self.get_json(&url, "path discovery").await?;

        let mut quotes = Vec::new();
        if let Some(records) = body["_embedded"]["records"].as_array() {
            for record in records {
                let native = record["source_asset_type"].as_str() == Some("native");
                let code = record["source_asset_code"].as_str().unwrap_or_default();
                let Some(source_asset) = self.book_lookup(code, native) else {
                    continue;
                };
                let source_amount =
                    from_network_amount(record["source_amount"].as_str().unwrap_or("0"))?;
                let path = record["path"]
                    .as_array()
                    .map(|hops| {
                        hops.iter()
                            .filter_map(|hop| {
                                let native =
                                    hop["asset_type"].as_str() == Some("native");
                                let code = hop["asset_code"].as_str().unwrap_or_default();
                                self.book_lookup(code, native).cloned()
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                quotes.push(PathQuote {
                    source_asset: source_asset.clone(),
                    source_amount,
                    path,
                });
            }
        }
        Ok(quotes)
    }
}

fn classify_transport(context: &str, err: &reqwest::Error) -> OpenSettleError {
    if err.is_timeout() {
        OpenSettleError::HorizonTimeout {
            context: context.to_string(),
        }
    } else {
        OpenSettleError::Transport {
            reason: format!("{context}: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Amount conversion
// ---------------------------------------------------------------------------

/// Stroop-scale integer -> Horizon 7-decimal-place amount string.
pub fn to_network_amount(amount: u128) -> Result<String> {
    let signed = i128::try_from(amount).map_err(|_| OpenSettleError::InvalidAmount {
        reason: format!("amount {amount} exceeds the network's representable range"),
    })?;
    let decimal = Decimal::try_from_i128_with_scale(signed, 7)
        .map_err(|e| OpenSettleError::InvalidAmount {
            reason: format!("amount {amount}: {e}"),
        })?;
    Ok(decimal.normalize().to_string())
}

/// Horizon amount string -> stroop-scale integer.
pub fn from_network_amount(amount: &str) -> Result<u128> {
    let decimal: Decimal =
        amount
            .parse()
            .map_err(|_| OpenSettleError::Serialization(format!(
                "invalid network amount: {amount}"
            )))?;
    let scaled = decimal
        .checked_mul(Decimal::from(constants::STROOPS_PER_UNIT))
        .ok_or_else(|| OpenSettleError::InvalidAmount {
            reason: format!("network amount out of range: {amount}"),
        })?;
    if scaled.fract() != Decimal::ZERO {
        return Err(OpenSettleError::InvalidAmount {
            reason: format!("network amount has sub-stroop precision: {amount}"),
        });
    }
    scaled.to_u128().ok_or_else(|| OpenSettleError::InvalidAmount {
        reason: format!("network amount is negative or out of range: {amount}"),
    })
}
