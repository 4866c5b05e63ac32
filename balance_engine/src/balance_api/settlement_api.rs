use std::fmt::Debug;

use balance_common::Money;
use log::*;

use crate::{
    balance_api::errors::SettlementError,
    db::{orders, profit_share, settlements, settlements::NewSettlement, shipments},
    db_types::{
        OrderSettlement,
        OrderShipmentRecord,
        ProfitShareConfig,
        ProfitShareRates,
        ProfitSplit,
        SettlementStatus,
        ShipmentStatus,
    },
    ledger,
    SqliteDatabase,
};

/// Settlement engine (C7): splits a settled order's profit between the platform, the operator and the shop owner.
#[derive(Clone)]
pub struct SettlementApi {
    db: SqliteDatabase,
}

impl Debug for SettlementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl SettlementApi {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    /// Replaces the profit-share rates for a shop and operator pair, effective immediately.
    pub async fn create_profit_share_config(
        &self,
        shop_id: i64,
        operator_id: i64,
        rates: ProfitShareRates,
    ) -> Result<ProfitShareConfig, SettlementError> {
        if !rates.is_valid() {
            return Err(SettlementError::InvalidProfitShare);
        }
        let mut tx = self.db.pool().begin().await?;
        let config = profit_share::replace_active(shop_id, operator_id, &rates, &mut tx).await?;
        tx.commit().await?;
        info!("🤝️ New profit share for shop {shop_id} and operator {operator_id}: {rates:?}");
        Ok(config)
    }

    /// The rates in force for the pair, or the default split.
    pub async fn active_rates(&self, shop_id: i64, operator_id: i64) -> Result<ProfitShareRates, SettlementError> {
        let mut conn = self.db.pool().acquire().await?;
        let config = profit_share::fetch_active(shop_id, operator_id, &mut conn).await?;
        Ok(config.map(|c| c.rates()).unwrap_or_default())
    }

    pub async fn fetch_settlement(&self, shop_id: i64, order_sn: &str) -> Result<Option<OrderSettlement>, SettlementError> {
        let mut conn = self.db.pool().acquire().await?;
        let settlement = settlements::fetch_settlement(shop_id, order_sn, &mut conn).await?;
        Ok(settlement)
    }

    /// Settles a shipped order against the escrow amount the marketplace paid out.
    ///
    /// The decision is first stored as a Pending settlement. The ledger movements then run in a single transaction
    /// that also completes the settlement and the shipment record, so a failure leaves nothing half-applied and the
    /// order can be settled again.
    pub async fn settle_order(
        &self,
        shop_id: i64,
        order_sn: &str,
        escrow_amount: Money,
    ) -> Result<OrderSettlement, SettlementError> {
        let pending = self.prepare(shop_id, order_sn, escrow_amount).await?;
        let mut tx = self.db.pool().begin().await?;
        let record = locked_shipped_record(shop_id, order_sn, &mut tx).await?;
        orders::lock_order(shop_id, order_sn, &mut tx).await?;
        // The order's remaining frozen prepayment is what sits in escrow custody. Refunds reduce both equally.
        let held = orders::fetch_order(shop_id, order_sn, &mut tx)
            .await?
            .map(|o| o.frozen_amount)
            .unwrap_or(record.frozen_amount)
            .min(record.frozen_amount);
        if held.is_positive() {
            ledger::settle_prepayment(record.shop_owner_id, held, order_sn, &mut tx).await?;
            ledger::transfer_from_escrow(record.shop_owner_id, held, order_sn, "order settled", &mut tx).await?;
            orders::set_frozen(shop_id, order_sn, Money::ZERO, false, &mut tx).await?;
        }
        if pending.operator_income.is_positive() {
            ledger::add_operator_income(record.operator_id, pending.operator_income, order_sn, &mut tx).await?;
        }
        if pending.shop_owner_share.is_positive() {
            ledger::add_shop_owner_commission(record.shop_owner_id, pending.shop_owner_share, order_sn, &mut tx).await?;
        }
        if pending.platform_share.is_positive() {
            ledger::add_platform_commission(pending.platform_share, order_sn, &mut tx).await?;
        }
        settlements::set_status(shop_id, pending.id, SettlementStatus::Completed, &mut tx).await?;
        shipments::mark_completed(shop_id, order_sn, pending.id, &mut tx).await?;
        tx.commit().await?;
        info!(
            "🤝️ Settled {order_sn}: profit {}, platform {}, operator {} (income {}), shop owner {}",
            pending.profit, pending.platform_share, pending.operator_share, pending.operator_income, pending.shop_owner_share
        );
        let settled = self
            .fetch_settlement(shop_id, order_sn)
            .await?
            .ok_or_else(|| SettlementError::SettlementNotFound(order_sn.to_string()))?;
        Ok(settled)
    }

    async fn prepare(
        &self,
        shop_id: i64,
        order_sn: &str,
        escrow_amount: Money,
    ) -> Result<OrderSettlement, SettlementError> {
        let mut tx = self.db.pool().begin().await?;
        let record = locked_shipped_record(shop_id, order_sn, &mut tx).await?;
        if let Some(existing) = settlements::fetch_settlement(shop_id, order_sn, &mut tx).await? {
            if existing.status == SettlementStatus::Completed {
                return Err(SettlementError::AlreadySettled(order_sn.to_string()));
            }
        }
        let rates = profit_share::fetch_active(shop_id, record.operator_id, &mut tx)
            .await?
            .map(|c| c.rates())
            .unwrap_or_default();
        let split = ProfitSplit::compute(escrow_amount, record.total_cost, &rates);
        let new_settlement = NewSettlement {
            shop_id,
            order_sn: order_sn.to_string(),
            operator_id: record.operator_id,
            shop_owner_id: record.shop_owner_id,
            escrow_amount,
            total_cost: record.total_cost,
            rates,
            split,
        };
        let pending = settlements::upsert_pending(&new_settlement, &mut tx)
            .await?
            .ok_or_else(|| SettlementError::AlreadySettled(order_sn.to_string()))?;
        tx.commit().await?;
        debug!("🤝️ Settlement of {order_sn} pending: {split:?}");
        Ok(pending)
    }
}

async fn locked_shipped_record(
    shop_id: i64,
    order_sn: &str,
    conn: &mut sqlx::SqliteConnection,
) -> Result<OrderShipmentRecord, SettlementError> {
    if !shipments::lock_record(shop_id, order_sn, &mut *conn).await? {
        return Err(SettlementError::NotReady(order_sn.to_string()));
    }
    let record = shipments::fetch_record(shop_id, order_sn, conn)
        .await?
        .ok_or_else(|| SettlementError::NotReady(order_sn.to_string()))?;
    match record.status {
        ShipmentStatus::Shipped => Ok(record),
        ShipmentStatus::Completed => Err(SettlementError::AlreadySettled(order_sn.to_string())),
        _ => Err(SettlementError::NotReady(order_sn.to_string())),
    }
}
