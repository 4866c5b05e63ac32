use std::{fmt::Debug, sync::Arc};

use balance_common::Money;
use log::*;

use crate::{
    balance_api::errors::PrepaymentError,
    db::{notifications, orders, shops},
    db_types::{AccountType, PrepaymentStatus, NOTIFICATION_PREPAYMENT_LOW},
    kv::{prepayment_notified, KvStore, PREPAYMENT_NOTIFIED_TTL},
    ledger,
    SqliteDatabase,
};

/// What a prepayment check did to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepaymentOutcome {
    /// Someone else already decided this order. Carries the status found.
    AlreadyChecked(PrepaymentStatus),
    /// The amount was frozen. `balance` is the available prepayment left afterwards.
    Frozen { amount: Money, balance: Money },
    /// Not enough available prepayment. `balance` is what was available.
    Insufficient { required: Money, balance: Money },
}

/// Reserves order costs from shop owners' prepayment accounts (C5).
#[derive(Clone)]
pub struct PrepaymentApi {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
}

impl Debug for PrepaymentApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrepaymentApi")
    }
}

impl PrepaymentApi {
    pub fn new(db: SqliteDatabase, kv: Arc<dyn KvStore>) -> Self {
        Self { db, kv }
    }

    /// Freezes the order's cost from the shop owner's prepayment, exactly once per order.
    ///
    /// `amount` is used only when the order row carries no prepayment amount from its escrow detail. When the
    /// balance falls short, the order is marked Insufficient and the shop owner is notified, at most once per
    /// cooldown period per shop.
    pub async fn check_and_deduct_for_order(
        &self,
        shop_id: i64,
        order_sn: &str,
        amount: Money,
    ) -> Result<PrepaymentOutcome, PrepaymentError> {
        // Cheap check without the write lock. The decisive check happens again under the lock.
        let mut conn = self.db.pool().acquire().await?;
        let order = orders::fetch_order(shop_id, order_sn, &mut conn)
            .await?
            .ok_or_else(|| PrepaymentError::OrderNotFound(order_sn.to_string()))?;
        drop(conn);
        if order.prepayment_status != PrepaymentStatus::Unchecked {
            trace!("🧊️ Order {order_sn} was already checked ({})", order.prepayment_status);
            return Ok(PrepaymentOutcome::AlreadyChecked(order.prepayment_status));
        }
        let (outcome, admin_id) = self.try_freeze(shop_id, order_sn, amount, PrepaymentStatus::Unchecked).await?;
        if let PrepaymentOutcome::Insufficient { required, balance } = outcome {
            self.notify_insufficient(shop_id, admin_id, order_sn, required, balance).await;
        }
        Ok(outcome)
    }

    /// Retries every READY_TO_SHIP order of the admin's shops that was short of funds, oldest first, stopping at
    /// the first one that still cannot be covered. Returns the number of orders frozen.
    pub async fn backfill_insufficient(&self, admin_id: i64) -> Result<usize, PrepaymentError> {
        let shops = {
            let mut conn = self.db.pool().acquire().await?;
            shops::fetch_shops_for_admin(admin_id, &mut conn).await?
        };
        let mut frozen = 0;
        for shop in shops {
            let pending = {
                let mut conn = self.db.pool().acquire().await?;
                orders::fetch_insufficient_ready_to_ship(shop.shop_id, &mut conn).await?
            };
            for order in pending {
                let (outcome, _) =
                    self.try_freeze(shop.shop_id, &order.order_sn, order.total_amount, PrepaymentStatus::Insufficient)
                        .await?;
                match outcome {
                    PrepaymentOutcome::Frozen { amount, .. } => {
                        debug!("🧊️ Backfilled order {} with {amount}", order.order_sn);
                        frozen += 1;
                    },
                    PrepaymentOutcome::Insufficient { .. } => {
                        info!("🧊️ Prepayment of admin {admin_id} exhausted after backfilling {frozen} orders");
                        return Ok(frozen);
                    },
                    PrepaymentOutcome::AlreadyChecked(_) => {},
                }
            }
        }
        if frozen > 0 {
            info!("🧊️ Backfilled {frozen} orders for admin {admin_id}");
        }
        Ok(frozen)
    }

    /// One locked attempt. The order must still be in `expected` once its row lock is held, otherwise another
    /// worker got there first. A failed backfill attempt leaves the order untouched.
    async fn try_freeze(
        &self,
        shop_id: i64,
        order_sn: &str,
        fallback_amount: Money,
        expected: PrepaymentStatus,
    ) -> Result<(PrepaymentOutcome, i64), PrepaymentError> {
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(shop_id, order_sn, &mut tx).await? {
            return Err(PrepaymentError::OrderNotFound(order_sn.to_string()));
        }
        let order = orders::fetch_order(shop_id, order_sn, &mut tx)
            .await?
            .ok_or_else(|| PrepaymentError::OrderNotFound(order_sn.to_string()))?;
        let shop = shops::fetch_shop(shop_id, &mut tx).await?.ok_or(PrepaymentError::ShopNotFound(shop_id))?;
        if order.prepayment_status != expected {
            return Ok((PrepaymentOutcome::AlreadyChecked(order.prepayment_status), shop.admin_id));
        }
        let amount = if order.prepayment_amount.is_positive() {
            order.prepayment_amount
        } else if fallback_amount.is_positive() {
            fallback_amount
        } else {
            order.total_amount
        };
        let account = ledger::get_or_create(shop.admin_id, AccountType::Prepayment, &mut tx).await?;
        if !amount.is_positive() {
            orders::mark_prepayment(shop_id, order_sn, PrepaymentStatus::Sufficient, account.balance, Money::ZERO, &mut tx)
                .await?;
            tx.commit().await?;
            return Ok((PrepaymentOutcome::Frozen { amount, balance: account.balance }, shop.admin_id));
        }
        if account.balance >= amount {
            let row = ledger::freeze_prepayment(shop.admin_id, amount, order_sn, &mut tx).await?;
            orders::mark_prepayment(shop_id, order_sn, PrepaymentStatus::Sufficient, row.balance_after, amount, &mut tx)
                .await?;
            tx.commit().await?;
            info!("🧊️ Froze {amount} of admin {}'s prepayment for order {order_sn}", shop.admin_id);
            return Ok((PrepaymentOutcome::Frozen { amount, balance: row.balance_after }, shop.admin_id));
        }
        let outcome = PrepaymentOutcome::Insufficient { required: amount, balance: account.balance };
        if expected == PrepaymentStatus::Unchecked {
            orders::mark_prepayment(
                shop_id,
                order_sn,
                PrepaymentStatus::Insufficient,
                account.balance,
                Money::ZERO,
                &mut tx,
            )
            .await?;
            tx.commit().await?;
            info!(
                "🧊️ Order {order_sn} needs {amount} but admin {} only has {} available. Marked insufficient",
                shop.admin_id, account.balance
            );
        } else {
            tx.rollback().await?;
        }
        Ok((outcome, shop.admin_id))
    }

    /// Best effort. A failure here never undoes the prepayment decision.
    async fn notify_insufficient(&self, shop_id: i64, admin_id: i64, order_sn: &str, required: Money, balance: Money) {
        match self.kv.set_nx_ex(&prepayment_notified(shop_id), order_sn, PREPAYMENT_NOTIFIED_TTL).await {
            Ok(true) => {},
            Ok(false) => {
                trace!("🧊️ Shop {shop_id} was notified recently. Skipping notification for {order_sn}");
                return;
            },
            Err(e) => {
                warn!("🧊️ Could not check the notification cooldown for shop {shop_id}: {e}");
                return;
            },
        }
        let title = "Prepayment balance too low";
        let content = format!(
            "Order {order_sn} of shop {shop_id} needs {required}, but only {balance} is available. Please recharge \
             your prepayment account."
        );
        let result = match self.db.pool().acquire().await {
            Ok(mut conn) => {
                notifications::insert_notification(
                    admin_id,
                    shop_id,
                    NOTIFICATION_PREPAYMENT_LOW,
                    title,
                    &content,
                    &mut conn,
                )
                .await
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("🧊️ Could not store the low-prepayment notification for shop {shop_id}: {e}");
        }
    }
}
