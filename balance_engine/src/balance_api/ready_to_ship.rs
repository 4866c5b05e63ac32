use std::{collections::HashMap, fmt::Debug, sync::Arc};

use balance_common::Money;
use log::*;
use shopee_tools::data_objects::EscrowDetail;

use crate::{
    balance_api::{
        errors::OrderEngineError,
        prepayment_api::{PrepaymentApi, PrepaymentOutcome},
        shop_api::ShopApi,
    },
    db::{escrows, orders},
    db_types::{EscrowSyncStatus, FeeBreakdown, PrepaymentStatus},
    events::ReadyToShipEvent,
    shopee_types::{escrow_item_amounts, escrow_items},
    traits::Marketplace,
    SqliteDatabase,
};

/// Splits `amount` over `weights` proportionally. The last share absorbs the rounding residual, so the shares always
/// add up to `amount`. With no usable weights the amount is split evenly.
pub fn apportion(amount: Money, weights: &[Money]) -> Vec<Money> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: i64 = weights.iter().map(|w| w.value().max(0)).sum();
    let n = weights.len();
    let mut shares = Vec::with_capacity(n);
    let mut allotted = Money::ZERO;
    for (i, w) in weights.iter().enumerate() {
        let share = if i == n - 1 {
            amount - allotted
        } else if total > 0 {
            let v = i128::from(amount.value()) * i128::from(w.value().max(0)) / i128::from(total);
            Money::from(v as i64)
        } else {
            Money::from(amount.value() / n as i64)
        };
        allotted += share;
        shares.push(share);
    }
    shares
}

/// Follow-up work when an order enters READY_TO_SHIP: capture the escrow fee breakdown, apportion the prepayment
/// amount over the line items, then run the prepayment check.
#[derive(Clone)]
pub struct ReadyToShipProcessor {
    db: SqliteDatabase,
    shops: ShopApi,
    marketplace: Arc<dyn Marketplace>,
    prepayment: PrepaymentApi,
}

impl Debug for ReadyToShipProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReadyToShipProcessor")
    }
}

impl ReadyToShipProcessor {
    pub fn new(db: SqliteDatabase, shops: ShopApi, marketplace: Arc<dyn Marketplace>, prepayment: PrepaymentApi) -> Self {
        Self { db, shops, marketplace, prepayment }
    }

    /// An escrow fetch failure is recorded and the check falls back to the order total.
    pub async fn process(&self, event: &ReadyToShipEvent) -> Result<PrepaymentOutcome, OrderEngineError> {
        match self.fetch_escrow(event).await {
            Ok(detail) => self.store_fees(event, &detail).await?,
            Err(e) => {
                warn!("🧊️ Could not fetch the escrow detail of {}: {e}. Using the order total", event.order_sn);
                let mut conn = self.db.pool().acquire().await?;
                escrows::upsert_escrow(
                    event.shop_id,
                    &event.order_sn,
                    &FeeBreakdown::default(),
                    EscrowSyncStatus::Failed,
                    &e.to_string(),
                    &mut conn,
                )
                .await?;
            },
        }
        let outcome = self.prepayment.check_and_deduct_for_order(event.shop_id, &event.order_sn, event.total_amount).await?;
        debug!("🧊️ Prepayment check of {}: {outcome:?}", event.order_sn);
        Ok(outcome)
    }

    async fn fetch_escrow(&self, event: &ReadyToShipEvent) -> Result<EscrowDetail, OrderEngineError> {
        let auth = self.shops.shop_auth(event.shop_id).await?;
        match self.marketplace.get_escrow_detail(&auth, &event.order_sn).await {
            Ok(detail) => Ok(detail),
            Err(e) => {
                if e.is_token_expired() {
                    self.shops.invalidate_token(event.shop_id).await?;
                }
                Err(e.into())
            },
        }
    }

    async fn store_fees(&self, event: &ReadyToShipEvent, detail: &EscrowDetail) -> Result<(), OrderEngineError> {
        let shop_id = event.shop_id;
        let sn = event.order_sn.as_str();
        let fees = FeeBreakdown::from(&detail.order_income);
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(shop_id, sn, &mut tx).await? {
            return Err(OrderEngineError::OrderNotFound(sn.to_string()));
        }
        let order = orders::fetch_order(shop_id, sn, &mut tx)
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(sn.to_string()))?;
        // Once checked, the amount that was frozen is authoritative.
        let amount = if order.prepayment_status == PrepaymentStatus::Unchecked {
            fees.prepayment_amount(order.total_amount)
        } else {
            order.prepayment_amount
        };
        orders::update_fee_breakdown(shop_id, sn, &fees, amount, &mut tx).await?;
        escrows::upsert_escrow(shop_id, sn, &fees, EscrowSyncStatus::Success, "", &mut tx).await?;
        escrows::replace_escrow_items(shop_id, sn, &escrow_items(detail), &mut tx).await?;

        let items = orders::fetch_items(shop_id, sn, &mut tx).await?;
        let by_key: HashMap<(i64, i64), Money> = escrow_item_amounts(detail).into_iter().collect();
        let weights = items
            .iter()
            .map(|i| by_key.get(&(i.item_id, i.model_id)).copied().unwrap_or(i.item_price * i.quantity))
            .collect::<Vec<_>>();
        for (item, share) in items.iter().zip(apportion(amount, &weights)) {
            orders::set_item_share(item.id, shop_id, share, &mut tx).await?;
        }
        tx.commit().await?;
        debug!("🧊️ Stored the fee breakdown of {sn}. Prepayment amount {amount}");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn m(v: i64) -> Money {
        Money::from(v)
    }

    #[test]
    fn shares_add_up() {
        let shares = apportion(m(1000), &[m(1), m(1), m(1)]);
        assert_eq!(shares, vec![m(333), m(333), m(334)]);
        let shares = apportion(m(28_050), &[m(20_000), m(10_000)]);
        assert_eq!(shares, vec![m(18_700), m(9_350)]);
        assert_eq!(shares.iter().copied().sum::<Money>(), m(28_050));
    }

    #[test]
    fn degenerate_weights() {
        assert!(apportion(m(100), &[]).is_empty());
        assert_eq!(apportion(m(100), &[Money::ZERO, Money::ZERO]), vec![m(50), m(50)]);
        assert_eq!(apportion(m(100), &[m(5)]), vec![m(100)]);
    }
}
