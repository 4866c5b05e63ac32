use std::{fmt::Debug, sync::Arc};

use balance_common::Money;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    balance_api::{errors::OrderEngineError, shop_api::ShopApi},
    db::{operation_logs, orders, shipments, shops},
    db_types::{NewOperationLog, Order, OrderSnapshot, OrderStatus, PrepaymentStatus, ShipmentStatus},
    events::{EventProducers, ReadyToShipEvent},
    kv::{order_status, order_update_time, KvStore, ORDER_STATUS_TTL, ORDER_UPDATE_TIME_TTL},
    ledger,
    traits::Marketplace,
    SqliteDatabase,
};

/// Where an order snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertSource {
    Sync,
    Webhook,
    /// An explicit re-fetch of one order. It bypasses the update-time filter, since the push that triggered it has
    /// usually recorded the same update time already.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonStatusReason {
    Locked,
    Regression,
}

#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The full snapshot, status included, was written.
    Stored { order: Order, entered_ready_to_ship: bool },
    /// Everything except the status was refreshed.
    NonStatusOnly(NonStatusReason),
    /// The snapshot was not newer than one already seen.
    Stale,
}

impl UpsertOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// The result of applying a bare status push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPush {
    Applied,
    Blocked(NonStatusReason),
    /// There is no local copy to apply the status to.
    Missing,
}

/// Order engine (C4): the only writer of marketplace-sourced order state.
#[derive(Clone)]
pub struct OrderApi {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    shops: ShopApi,
    marketplace: Arc<dyn Marketplace>,
    producers: EventProducers,
}

impl Debug for OrderApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderApi")
    }
}

fn is_regression(existing: &Order, incoming: &str) -> bool {
    existing.status().priority() > OrderStatus::from(incoming).priority()
}

impl OrderApi {
    pub fn new(
        db: SqliteDatabase,
        kv: Arc<dyn KvStore>,
        shops: ShopApi,
        marketplace: Arc<dyn Marketplace>,
        producers: EventProducers,
    ) -> Self {
        Self { db, kv, shops, marketplace, producers }
    }

    pub async fn upsert_from_sync(&self, snapshot: &OrderSnapshot) -> Result<UpsertOutcome, OrderEngineError> {
        self.upsert(snapshot, UpsertSource::Sync).await
    }

    pub async fn upsert_from_webhook(&self, snapshot: &OrderSnapshot) -> Result<UpsertOutcome, OrderEngineError> {
        self.upsert(snapshot, UpsertSource::Webhook).await
    }

    /// Fetches one order from the marketplace and stores it.
    pub async fn refresh_one(&self, shop_id: i64, order_sn: &str) -> Result<UpsertOutcome, OrderEngineError> {
        let auth = self.shops.shop_auth(shop_id).await?;
        let details = match self.marketplace.get_order_detail(&auth, &[order_sn.to_string()]).await {
            Ok(d) => d,
            Err(e) => {
                if e.is_token_expired() {
                    self.shops.invalidate_token(shop_id).await?;
                }
                return Err(e.into());
            },
        };
        let detail = details
            .into_iter()
            .find(|d| d.order_sn == order_sn)
            .ok_or_else(|| OrderEngineError::OrderNotFound(order_sn.to_string()))?;
        let snapshot = OrderSnapshot::from_detail(shop_id, &detail);
        self.upsert(&snapshot, UpsertSource::Refresh).await
    }

    /// Stores a marketplace snapshot of an order.
    ///
    /// A status-locked order, or a snapshot whose status has a lower priority than the stored one, only refreshes
    /// the non-status fields. Snapshots whose update time is not newer than the last one seen are dropped. Entering
    /// READY_TO_SHIP with an unchecked prepayment publishes a [`ReadyToShipEvent`] after commit. Entering CANCELLED
    /// releases any prepayment held for the order.
    pub async fn upsert(&self, snapshot: &OrderSnapshot, source: UpsertSource) -> Result<UpsertOutcome, OrderEngineError> {
        let existing = {
            let mut conn = self.db.pool().acquire().await?;
            orders::fetch_order(snapshot.shop_id, &snapshot.order_sn, &mut conn).await?
        };
        if let Some(existing) = &existing {
            if let Some(reason) = self.non_status_reason(existing, &snapshot.order_status) {
                return self.update_non_status(snapshot, existing, reason).await;
            }
        }
        if source != UpsertSource::Refresh && snapshot.update_time > 0 {
            let key = order_update_time(snapshot.shop_id, &snapshot.order_sn);
            if !self.kv.check_and_set_greater(&key, snapshot.update_time, ORDER_UPDATE_TIME_TTL).await? {
                trace!("🔄️ Order {} at {} is not newer than the last seen. Skipping", snapshot.order_sn, snapshot.update_time);
                return Ok(UpsertOutcome::Stale);
            }
        }

        let mut tx = self.db.pool().begin().await?;
        let previous = if orders::lock_order(snapshot.shop_id, &snapshot.order_sn, &mut tx).await? {
            orders::fetch_order(snapshot.shop_id, &snapshot.order_sn, &mut tx).await?
        } else {
            None
        };
        // The status may have moved since the unlocked read above.
        if let Some(previous) = &previous {
            if let Some(reason) = self.non_status_reason(previous, &snapshot.order_status) {
                write_non_status(snapshot, &mut tx).await?;
                tx.commit().await?;
                return Ok(UpsertOutcome::NonStatusOnly(reason));
            }
        }
        let order = orders::upsert_order(snapshot, &mut tx).await?;
        write_children(snapshot, &mut tx).await?;
        let was_cancelled = previous.as_ref().map(|p| p.status() == OrderStatus::Cancelled).unwrap_or(false);
        if order.status() == OrderStatus::Cancelled && !was_cancelled {
            release_order_funds(&order, "order cancelled", &mut tx).await?;
        }
        tx.commit().await?;
        self.cache_status(&order).await;

        let entered_ready_to_ship =
            order.status() == OrderStatus::ReadyToShip && order.prepayment_status == PrepaymentStatus::Unchecked;
        match &previous {
            None => debug!("🔄️ Order {} created in {} ({source:?})", order.order_sn, order.order_status),
            Some(p) if p.order_status != order.order_status => {
                debug!("🔄️ Order {} moved {} -> {} ({source:?})", order.order_sn, p.order_status, order.order_status)
            },
            Some(_) => trace!("🔄️ Order {} refreshed ({source:?})", order.order_sn),
        }
        if entered_ready_to_ship {
            let event = ReadyToShipEvent::new(order.shop_id, order.order_sn.clone(), order.total_amount);
            self.producers.publish_ready_to_ship(event).await;
        }
        Ok(UpsertOutcome::Stored { order, entered_ready_to_ship })
    }

    fn non_status_reason(&self, existing: &Order, incoming_status: &str) -> Option<NonStatusReason> {
        if existing.status_locked {
            Some(NonStatusReason::Locked)
        } else if is_regression(existing, incoming_status) {
            Some(NonStatusReason::Regression)
        } else {
            None
        }
    }

    async fn update_non_status(
        &self,
        snapshot: &OrderSnapshot,
        existing: &Order,
        reason: NonStatusReason,
    ) -> Result<UpsertOutcome, OrderEngineError> {
        let mut tx = self.db.pool().begin().await?;
        write_non_status(snapshot, &mut tx).await?;
        if reason == NonStatusReason::Regression {
            let detail = format!("{} -> {} blocked", existing.order_status, snapshot.order_status);
            let log = NewOperationLog::new(snapshot.shop_id, &snapshot.order_sn, "status_regression_blocked", detail);
            operation_logs::insert_log(&log, &mut tx).await?;
        }
        tx.commit().await?;
        debug!(
            "🔄️ Order {} kept status {} ({reason:?}); incoming {}",
            snapshot.order_sn, existing.order_status, snapshot.order_status
        );
        Ok(UpsertOutcome::NonStatusOnly(reason))
    }

    /// Applies a bare status change pushed by the marketplace, honouring the status lock and the priority order.
    pub async fn apply_status_push(
        &self,
        shop_id: i64,
        order_sn: &str,
        status: &str,
    ) -> Result<StatusPush, OrderEngineError> {
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(shop_id, order_sn, &mut tx).await? {
            return Ok(StatusPush::Missing);
        }
        let order = orders::fetch_order(shop_id, order_sn, &mut tx)
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(order_sn.to_string()))?;
        if let Some(reason) = self.non_status_reason(&order, status) {
            let detail = format!("{} -> {status} blocked ({reason:?})", order.order_status);
            let log = NewOperationLog::new(shop_id, order_sn, "status_regression_blocked", detail);
            operation_logs::insert_log(&log, &mut tx).await?;
            tx.commit().await?;
            return Ok(StatusPush::Blocked(reason));
        }
        orders::set_status(shop_id, order_sn, status, "", None, &mut tx).await?;
        if status == OrderStatus::Cancelled.as_str() && order.status() != OrderStatus::Cancelled {
            release_order_funds(&order, "order cancelled", &mut tx).await?;
        }
        tx.commit().await?;
        self.invalidate_caches(shop_id, order_sn, false).await;
        debug!("🔄️ Order {order_sn} status pushed {} -> {status}", order.order_status);
        Ok(StatusPush::Applied)
    }

    /// Manual override. Skips the priority and update-time filters, sets the lock flag to `lock`, and invalidates
    /// both caches so the next sync starts from the database.
    pub async fn force_update_status(
        &self,
        shop_id: i64,
        order_sn: &str,
        status: &str,
        remark: &str,
        lock: bool,
        operator_id: i64,
    ) -> Result<(), OrderEngineError> {
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(shop_id, order_sn, &mut tx).await? {
            return Err(OrderEngineError::OrderNotFound(order_sn.to_string()));
        }
        let order = orders::fetch_order(shop_id, order_sn, &mut tx)
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(order_sn.to_string()))?;
        orders::set_status(shop_id, order_sn, status, remark, Some(lock), &mut tx).await?;
        let detail = format!("{} -> {status}, locked: {lock}, remark: {remark}", order.order_status);
        let log = NewOperationLog::new(shop_id, order_sn, "force_status", detail).by(operator_id);
        operation_logs::insert_log(&log, &mut tx).await?;
        tx.commit().await?;
        self.invalidate_caches(shop_id, order_sn, true).await;
        info!("🔄️ Order {order_sn} forced to {status} by {operator_id} (locked: {lock})");
        Ok(())
    }

    /// Clears the status lock and keeps the current status.
    pub async fn unlock_status(&self, shop_id: i64, order_sn: &str, operator_id: i64) -> Result<(), OrderEngineError> {
        let mut tx = self.db.pool().begin().await?;
        if !orders::set_status_locked(shop_id, order_sn, false, &mut tx).await? {
            return Err(OrderEngineError::OrderNotFound(order_sn.to_string()));
        }
        let log = NewOperationLog::new(shop_id, order_sn, "unlock_status", "").by(operator_id);
        operation_logs::insert_log(&log, &mut tx).await?;
        tx.commit().await?;
        self.invalidate_caches(shop_id, order_sn, false).await;
        info!("🔄️ Order {order_sn} unlocked by {operator_id}");
        Ok(())
    }

    pub async fn is_status_locked(&self, shop_id: i64, order_sn: &str) -> Result<bool, OrderEngineError> {
        let order = self.fetch_order(shop_id, order_sn).await?;
        Ok(order.status_locked)
    }

    pub async fn fetch_order(&self, shop_id: i64, order_sn: &str) -> Result<Order, OrderEngineError> {
        let mut conn = self.db.pool().acquire().await?;
        orders::fetch_order(shop_id, order_sn, &mut conn)
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(order_sn.to_string()))
    }

    /// The order's status, from the cache when possible.
    pub async fn order_status(&self, shop_id: i64, order_sn: &str) -> Result<String, OrderEngineError> {
        match self.kv.get(&order_status(shop_id, order_sn)).await {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {},
            Err(e) => warn!("🔄️ Status cache unavailable: {e}"),
        }
        let order = self.fetch_order(shop_id, order_sn).await?;
        self.cache_status(&order).await;
        Ok(order.order_status)
    }

    /// Marketplace cancellation. The status becomes CANCELLED unless it is locked, and any prepayment held for the
    /// order is released whether or not the status moved. Returns the amount released.
    pub async fn cancel_order(&self, shop_id: i64, order_sn: &str, reason: &str) -> Result<Money, OrderEngineError> {
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(shop_id, order_sn, &mut tx).await? {
            return Err(OrderEngineError::OrderNotFound(order_sn.to_string()));
        }
        let order = orders::fetch_order(shop_id, order_sn, &mut tx)
            .await?
            .ok_or_else(|| OrderEngineError::OrderNotFound(order_sn.to_string()))?;
        if !order.status_locked {
            orders::set_status(shop_id, order_sn, OrderStatus::Cancelled.as_str(), reason, None, &mut tx).await?;
        }
        let released = release_order_funds(&order, reason, &mut tx).await?;
        let detail = format!("{reason}; released {released}");
        operation_logs::insert_log(&NewOperationLog::new(shop_id, order_sn, "order_cancelled", detail), &mut tx).await?;
        tx.commit().await?;
        self.invalidate_caches(shop_id, order_sn, false).await;
        info!("🔄️ Order {order_sn} cancelled ({reason}). Released {released}");
        Ok(released)
    }

    /// Stores a tracking number pushed by the marketplace on the order and its packages.
    pub async fn update_tracking(&self, shop_id: i64, order_sn: &str, tracking: &str) -> Result<bool, OrderEngineError> {
        if tracking.is_empty() {
            return Ok(false);
        }
        let mut tx = self.db.pool().begin().await?;
        let found = orders::set_tracking_number(shop_id, order_sn, tracking, &mut tx).await?;
        orders::set_package_tracking(shop_id, order_sn, tracking, &mut tx).await?;
        tx.commit().await?;
        trace!("🔄️ Tracking number of {order_sn} is now {tracking}");
        Ok(found)
    }

    async fn cache_status(&self, order: &Order) {
        let key = order_status(order.shop_id, &order.order_sn);
        if let Err(e) = self.kv.set_ex(&key, &order.order_status, ORDER_STATUS_TTL).await {
            warn!("🔄️ Could not cache the status of {}: {e}", order.order_sn);
        }
    }

    async fn invalidate_caches(&self, shop_id: i64, order_sn: &str, update_time_too: bool) {
        let mut keys = vec![order_status(shop_id, order_sn)];
        if update_time_too {
            keys.push(order_update_time(shop_id, order_sn));
        }
        for key in keys {
            if let Err(e) = self.kv.del(&key).await {
                warn!("🔄️ Could not invalidate {key}: {e}");
            }
        }
    }
}

async fn write_non_status(snapshot: &OrderSnapshot, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    if orders::update_non_status(snapshot, &mut *conn).await? {
        write_children(snapshot, conn).await?;
    }
    Ok(())
}

async fn write_children(snapshot: &OrderSnapshot, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    orders::replace_items(snapshot.shop_id, &snapshot.order_sn, &snapshot.items, &mut *conn).await?;
    orders::replace_address(snapshot.shop_id, &snapshot.order_sn, &snapshot.address, &mut *conn).await?;
    orders::upsert_packages(&snapshot.packages, conn).await?;
    Ok(())
}

/// Returns the prepayment still held for a cancelled order to the shop owner. A shipped order also has its escrow
/// custody reversed and its shipment record cancelled. `order` must be the row read under the order lock.
pub(crate) async fn release_order_funds(
    order: &Order,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Money, OrderEngineError> {
    let shop = shops::fetch_shop(order.shop_id, &mut *conn).await?.ok_or(OrderEngineError::ShopNotFound(order.shop_id))?;
    let sn = order.order_sn.as_str();
    let held = order.frozen_amount;
    let record = shipments::fetch_record(order.shop_id, sn, &mut *conn).await?;
    let shipped = record.as_ref().filter(|r| r.status == ShipmentStatus::Shipped);
    if shipped.is_none() && (order.prepayment_status != PrepaymentStatus::Sufficient || !held.is_positive()) {
        return Ok(Money::ZERO);
    }
    if held.is_positive() {
        ledger::unfreeze_prepayment(shop.admin_id, held, sn, reason, &mut *conn).await?;
    }
    if let Some(record) = shipped {
        let custody = record.frozen_amount.min(held);
        if custody.is_positive() {
            ledger::transfer_from_escrow(shop.admin_id, custody, sn, reason, &mut *conn).await?;
        }
        shipments::set_status(order.shop_id, sn, ShipmentStatus::Cancelled, reason, &mut *conn).await?;
    }
    orders::set_frozen(order.shop_id, sn, Money::ZERO, true, conn).await?;
    Ok(held)
}

#[cfg(test)]
mod test {
    use super::*;

    fn order(status: &str) -> Order {
        Order {
            id: 1,
            shop_id: 1,
            order_sn: "SN".into(),
            region: String::new(),
            currency: String::new(),
            cod: false,
            total_amount: Money::ZERO,
            order_status: status.into(),
            status_locked: false,
            status_remark: String::new(),
            shipping_carrier: String::new(),
            payment_method: String::new(),
            tracking_number: String::new(),
            buyer_user_id: 0,
            buyer_username: String::new(),
            create_time: 0,
            update_time: 0,
            pay_time: 0,
            ship_by_date: 0,
            prepayment_amount: Money::ZERO,
            prepayment_status: PrepaymentStatus::Unchecked,
            prepayment_snapshot: Money::ZERO,
            prepayment_checked_at: None,
            frozen_amount: Money::ZERO,
            escrow_amount: Money::ZERO,
            commission_fee: Money::ZERO,
            service_fee: Money::ZERO,
            seller_transaction_fee: Money::ZERO,
            buyer_paid_shipping_fee: Money::ZERO,
            actual_shipping_fee: Money::ZERO,
            credit_card_transaction_fee: Money::ZERO,
            fee_synced_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn regressions() {
        assert!(is_regression(&order("SHIPPED"), "READY_TO_SHIP"));
        assert!(is_regression(&order("CANCELLED"), "IN_CANCEL"));
        assert!(!is_regression(&order("READY_TO_SHIP"), "READY_TO_SHIP"));
        assert!(!is_regression(&order("UNPAID"), "READY_TO_SHIP"));
        // Unknown statuses never block a known one, and never overwrite one either.
        assert!(!is_regression(&order("SOMETHING_NEW"), "UNPAID"));
        assert!(is_regression(&order("UNPAID"), "SOMETHING_NEW"));
    }
}
