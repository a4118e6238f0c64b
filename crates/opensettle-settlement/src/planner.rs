//! Deterministic settlement planning.
//!
//! A plan is a pure function of (subnet, block, withdrawal queue, treasury
//! holdings): the same inputs always yield the same transactions in the
//! same order, each carrying the same derived idempotency token. That
//! determinism is what lets the orchestrator re-derive and cross-check the
//! plan at execution time, and what makes replanning after a crash safe.

use std::collections::BTreeMap;

use tracing::debug;

use opensettle_types::{
    AssetId, IdempotencyToken, LedgerHasher, PaymentOp, Result, SettlementPlan,
    SettlementTransaction, SubnetId, TreasurySnapshot, TxKind, WithdrawalIntent,
};

use opensettle_commit::PomValidator;

/// Builds deterministic settlement plans from committed withdrawal queues.
#[derive(Debug, Clone, Copy)]
pub struct SettlementPlanner<H: LedgerHasher + Copy> {
    hasher: H,
    max_ops_per_transaction: usize,
}

impl<H: LedgerHasher + Copy> SettlementPlanner<H> {
    #[must_use]
    pub fn new(hasher: H, max_ops_per_transaction: usize) -> Self {
        Self {
            hasher,
            max_ops_per_transaction,
        }
    }

    /// Build the settlement plan for a committed (subnet, block) queue.
    ///
    /// - The idempotency token is derived from (subnet, block) — not
    ///   random — and attached to every transaction as its memo.
    /// - Withdrawals are grouped by asset id; within a group they are
    ///   sorted by withdrawal id bytes, then batched into transactions of
    ///   at most `max_ops_per_transaction` operations.
    /// - A withdrawal whose asset the treasury does not hold becomes a
    ///   single-operation path-payment transaction; the conversion route
    ///   itself is discovered at execution time, since quotes go stale.
    /// - `totals_by_asset` is recomputed from the raw queue, independent
    ///   of the grouping above, for the orchestrator's cross-check.
    pub fn build_plan(
        &self,
        subnet_id: SubnetId,
        block_number: u64,
        withdrawals: &[WithdrawalIntent],
        treasury: &TreasurySnapshot,
    ) -> Result<SettlementPlan> {
        let token = IdempotencyToken::derive(&subnet_id, block_number, &self.hasher);

        // Group by asset id; BTreeMap iteration fixes the asset order.
        let mut groups: BTreeMap<AssetId, Vec<&WithdrawalIntent>> = BTreeMap::new();
        for intent in withdrawals {
            groups
                .entry(intent.asset.id(&self.hasher))
                .or_default()
                .push(intent);
        }

        let mut transactions = Vec::new();
        for (asset_id, mut group) in groups {
            group.sort_by(|a, b| a.withdrawal_id.cmp(&b.withdrawal_id));
            let asset = group[0].asset.clone();

            if treasury.holds(&asset_id) {
                for chunk in group.chunks(self.max_ops_per_transaction) {
                    transactions.push(SettlementTransaction {
                        kind: TxKind::Payment,
                        asset: asset.clone(),
                        operations: chunk.iter().map(|w| payment_op(w)).collect(),
                        memo: token,
                    });
                }
            } else {
                // Converted delivery: one operation per transaction, so a
                // path is discovered per destination amount.
                for intent in group {
                    transactions.push(SettlementTransaction {
                        kind: TxKind::PathPayment,
                        asset: asset.clone(),
                        operations: vec![payment_op(intent)],
                        memo: token,
                    });
                }
            }
        }

        // Independent recomputation of the per-asset totals.
        let totals_by_asset = PomValidator::new(self.hasher).net_outflow(withdrawals)?;

        debug!(
            subnet = %subnet_id,
            block = block_number,
            transactions = transactions.len(),
            assets = totals_by_asset.len(),
            "settlement plan built"
        );
        Ok(SettlementPlan {
            subnet_id,
            block_number,
            idempotency_token: token,
            transactions,
            totals_by_asset,
        })
    }
}

fn payment_op(intent: &WithdrawalIntent) -> PaymentOp {
    PaymentOp {
        withdrawal_id: intent.withdrawal_id,
        destination: intent.destination,
        amount: intent.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensettle_types::{Asset, Sha256Hasher, UserId, WithdrawalId};
    use std::collections::BTreeMap as Map;

    fn planner(max_ops: usize) -> SettlementPlanner<Sha256Hasher> {
        SettlementPlanner::new(Sha256Hasher, max_ops)
    }

    fn asset_x() -> Asset {
        Asset::issued("X", [9; 32])
    }

    fn asset_y() -> Asset {
        Asset::issued("Y", [8; 32])
    }

    fn intent(id: u8, asset: &Asset, amount: i128) -> WithdrawalIntent {
        WithdrawalIntent {
            withdrawal_id: WithdrawalId([id; 32]),
            user_id: UserId([id; 32]),
            asset: asset.clone(),
            amount,
            destination: [7; 32],
        }
    }

    fn treasury_holding(assets: &[(&Asset, u128)]) -> TreasurySnapshot {
        let mut balances = Map::new();
        for (asset, amount) in assets {
            balances.insert(asset.id(&Sha256Hasher), *amount);
        }
        TreasurySnapshot {
            balances,
            signers: std::collections::BTreeSet::new(),
            threshold: 0,
        }
    }

    #[test]
    fn happy_path_single_batch() {
        // Two withdrawals of one held asset fit in one transaction.
        let x = asset_x();
        let treasury = treasury_holding(&[(&x, 5_000_000)]);
        let withdrawals = vec![intent(1, &x, 1_000_000), intent(2, &x, 500_000)];

        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();

        assert_eq!(plan.transactions.len(), 1);
        assert_eq!(plan.transactions[0].kind, TxKind::Payment);
        assert_eq!(plan.transactions[0].operations.len(), 2);
        assert_eq!(
            plan.totals_by_asset.outflow_of(&x.id(&Sha256Hasher)),
            1_500_000
        );
    }

    #[test]
    fn token_is_derived_not_random() {
        let x = asset_x();
        let treasury = treasury_holding(&[(&x, 100)]);
        let withdrawals = vec![intent(1, &x, 10)];
        let p = planner(100);

        let a = p
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        let b = p
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        assert_eq!(a.idempotency_token, b.idempotency_token);
        assert_eq!(
            a.idempotency_token,
            IdempotencyToken::derive(&SubnetId([1; 32]), 7, &Sha256Hasher)
        );
    }

    #[test]
    fn every_transaction_carries_the_token() {
        let x = asset_x();
        let y = asset_y();
        let treasury = treasury_holding(&[(&x, 100)]); // y not held -> FX
        let withdrawals = vec![intent(1, &x, 10), intent(2, &y, 20)];

        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        assert!(plan.transactions.len() >= 2);
        for tx in &plan.transactions {
            assert_eq!(tx.memo, plan.idempotency_token);
        }
    }

    #[test]
    fn batching_respects_operation_limit() {
        let x = asset_x();
        let treasury = treasury_holding(&[(&x, u128::MAX)]);
        let withdrawals: Vec<WithdrawalIntent> =
            (1..=7u8).map(|i| intent(i, &x, 10)).collect();

        let plan = planner(3)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();

        let sizes: Vec<usize> = plan
            .transactions
            .iter()
            .map(|tx| tx.operations.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn plan_is_order_independent() {
        let x = asset_x();
        let y = asset_y();
        let treasury = treasury_holding(&[(&x, 1_000), (&y, 1_000)]);
        let withdrawals = vec![
            intent(3, &x, 10),
            intent(1, &y, 20),
            intent(2, &x, 30),
        ];
        let mut shuffled = withdrawals.clone();
        shuffled.reverse();

        let p = planner(100);
        let a = p
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        let b = p
            .build_plan(SubnetId([1; 32]), 7, &shuffled, &treasury)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn within_group_sorted_by_withdrawal_id() {
        let x = asset_x();
        let treasury = treasury_holding(&[(&x, 1_000)]);
        let withdrawals = vec![intent(9, &x, 10), intent(1, &x, 20), intent(5, &x, 30)];

        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        let ids: Vec<WithdrawalId> = plan.transactions[0]
            .operations
            .iter()
            .map(|op| op.withdrawal_id)
            .collect();
        assert_eq!(
            ids,
            vec![
                WithdrawalId([1; 32]),
                WithdrawalId([5; 32]),
                WithdrawalId([9; 32])
            ]
        );
    }

    #[test]
    fn unheld_asset_routes_through_fx() {
        let x = asset_x();
        let y = asset_y();
        let treasury = treasury_holding(&[(&x, 1_000)]);
        let withdrawals = vec![intent(1, &y, 20), intent(2, &y, 30)];

        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();

        // One single-operation path payment per converted withdrawal.
        assert_eq!(plan.transactions.len(), 2);
        for tx in &plan.transactions {
            assert_eq!(tx.kind, TxKind::PathPayment);
            assert_eq!(tx.operations.len(), 1);
        }
    }

    #[test]
    fn totals_cover_fx_and_direct_alike() {
        let x = asset_x();
        let y = asset_y();
        let treasury = treasury_holding(&[(&x, 1_000)]);
        let withdrawals = vec![intent(1, &x, 10), intent(2, &y, 20)];

        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &withdrawals, &treasury)
            .unwrap();
        assert_eq!(plan.totals_by_asset.outflow_of(&x.id(&Sha256Hasher)), 10);
        assert_eq!(plan.totals_by_asset.outflow_of(&y.id(&Sha256Hasher)), 20);
    }

    #[test]
    fn empty_queue_yields_empty_plan() {
        let treasury = treasury_holding(&[]);
        let plan = planner(100)
            .build_plan(SubnetId([1; 32]), 7, &[], &treasury)
            .unwrap();
        assert!(plan.transactions.is_empty());
        assert!(plan.totals_by_asset.is_empty());
    }
}
