//! Foreign-exchange routing for withdrawals the treasury cannot pay
//! directly.
//!
//! The engine quotes strict-receive paths on the external market: the
//! destination amount is always exact and never internally priced — no
//! oracle, no synthetic rate. What floats is the source amount, which is
//! buffered by a bounded percentage to tolerate price movement between
//! discovery and execution.

use tracing::debug;

use opensettle_types::{Asset, FxRoute, OpenSettleError, Result};

use crate::gateway::{PathMarket, PathQuote};

/// Discovers conversion routes and enforces the slippage bound.
pub struct FxEngine<M: PathMarket> {
    market: M,
    send_buffer_percent: u32,
}

impl<M: PathMarket> FxEngine<M> {
    #[must_use]
    pub fn new(market: M, send_buffer_percent: u32) -> Self {
        Self {
            market,
            send_buffer_percent,
        }
    }

    /// Find the cheapest route delivering exactly `dest_amount` of
    /// `dest_asset`, spending one of the treasury's `source_assets`.
    ///
    /// The returned route's `send_max` is the quoted estimate plus the
    /// configured buffer.
    ///
    /// # Errors
    /// [`OpenSettleError::PathNotFound`] when the market offers no path.
    pub async fn discover_route(
        &self,
        source_assets: &[Asset],
        dest_asset: &Asset,
        dest_amount: u128,
    ) -> Result<FxRoute> {
        let quotes = self
            .market
            .strict_receive_paths(source_assets, dest_asset, dest_amount)
            .await?;

        let best = quotes
            .into_iter()
            .min_by_key(|quote| quote.source_amount)
            .ok_or_else(|| OpenSettleError::PathNotFound {
                asset: dest_asset.to_string(),
            })?;

        let route = route_from_quote(best, self.send_buffer_percent);
        debug!(
            dest = %dest_asset,
            dest_amount,
            source = %route.source_asset,
            estimate = route.estimate,
            send_max = route.send_max,
            "conversion route discovered"
        );
        Ok(route)
    }

    /// Whether a fresh estimate stays within `max_percent` of the
    /// estimate the route was budgeted at.
    #[must_use]
    pub fn validate_slippage(expected: u128, actual: u128, max_percent: u32) -> bool {
        actual <= buffered(expected, max_percent)
    }
}

fn route_from_quote(quote: PathQuote, buffer_percent: u32) -> FxRoute {
    FxRoute {
        send_max: buffered(quote.source_amount, buffer_percent),
        source_asset: quote.source_asset,
        estimate: quote.source_amount,
        path: quote.path,
    }
}

/// `amount` increased by `percent`, rounded up. Saturates rather than
/// overflows at the top of the u128 range.
#[must_use]
pub fn buffered(amount: u128, percent: u32) -> u128 {
    let scaled = amount
        .checked_mul(100 + u128::from(percent))
        .map_or(u128::MAX, |v| v.div_ceil(100));
    scaled.max(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensettle_types::Asset;

    struct FixedMarket(Vec<PathQuote>);

    impl PathMarket for FixedMarket {
        async fn strict_receive_paths(
            &self,
            _source_assets: &[Asset],
            _dest_asset: &Asset,
            _dest_amount: u128,
        ) -> Result<Vec<PathQuote>> {
            Ok(self.0.clone())
        }
    }

    fn xlm() -> Asset {
        Asset::native("XLM")
    }

    fn usdc() -> Asset {
        Asset::issued("USDC", [9; 32])
    }

    fn eurc() -> Asset {
        Asset::issued("EURC", [8; 32])
    }

    #[tokio::test]
    async fn picks_cheapest_quote() {
        let market = FixedMarket(vec![
            PathQuote {
                source_asset: xlm(),
                source_amount: 2_000,
                path: vec![],
            },
            PathQuote {
                source_asset: usdc(),
                source_amount: 1_000,
                path: vec![eurc()],
            },
        ]);
        let engine = FxEngine::new(market, 1);

        let route = engine
            .discover_route(&[xlm(), usdc()], &eurc(), 900)
            .await
            .unwrap();
        assert_eq!(route.source_asset, usdc());
        assert_eq!(route.estimate, 1_000);
        assert_eq!(route.send_max, 1_010); // 1% buffer
    }

    #[tokio::test]
    async fn no_quotes_is_path_not_found() {
        let engine = FxEngine::new(FixedMarket(vec![]), 1);
        let err = engine
            .discover_route(&[xlm()], &eurc(), 900)
            .await
            .unwrap_err();
        assert!(matches!(err, OpenSettleError::PathNotFound { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn buffer_rounds_up() {
        assert_eq!(buffered(1_000, 1), 1_010);
        assert_eq!(buffered(999, 1), 1_009); // 1008.99 rounds up
        assert_eq!(buffered(1, 1), 2); // 1.01 rounds up
        assert_eq!(buffered(0, 1), 0);
    }

    #[test]
    fn buffer_saturates_at_u128_max() {
        assert_eq!(buffered(u128::MAX, 1), u128::MAX);
    }

    #[test]
    fn slippage_bound_is_inclusive() {
        assert!(FxEngine::<FixedMarket>::validate_slippage(1_000, 1_000, 1));
        assert!(FxEngine::<FixedMarket>::validate_slippage(1_000, 1_010, 1));
        assert!(!FxEngine::<FixedMarket>::validate_slippage(1_000, 1_011, 1));
    }

    #[test]
    fn cheaper_actual_always_passes() {
        assert!(FxEngine::<FixedMarket>::validate_slippage(1_000, 500, 0));
    }
}
