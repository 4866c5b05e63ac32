use std::{fmt::Debug, sync::Arc, time::Duration};

use balance_common::Money;
use log::*;

use crate::{
    balance_api::errors::ReturnEngineError,
    db::{operation_logs, orders, returns, shipments, shops},
    db_types::{is_refund_confirmed, NewOperationLog, PrepaymentStatus, RefundStatus, ReturnRecord, ReturnSnapshot, ShipmentStatus},
    kv::{return_lock, KvStore, LeaseLock, RETURN_LOCK_TTL},
    ledger,
    SqliteDatabase,
};

const LOCK_TRIES: u32 = 3;
const LOCK_JITTER: Duration = Duration::from_millis(200);

/// What happened to the money side of a refund-confirmed return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundResult {
    Processed { unfrozen: Money },
    /// The order had no prepayment frozen, so there was nothing to give back.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum ReturnOutcome {
    /// Another worker holds the return's lock and will handle it.
    Busy,
    /// The record was stored. `refund` is set only when this call claimed the refund.
    Stored { record: ReturnRecord, refund: Option<RefundResult> },
}

/// Return engine (C6). Unfreezes prepayment exactly once per refund-confirmed return.
#[derive(Clone)]
pub struct ReturnApi {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
}

impl Debug for ReturnApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReturnApi")
    }
}

impl ReturnApi {
    pub fn new(db: SqliteDatabase, kv: Arc<dyn KvStore>) -> Self {
        Self { db, kv }
    }

    /// Stores the marketplace's view of a return and, if this call is the one that moved it to Processing, runs the
    /// refund side effect.
    pub async fn upsert_return(&self, snapshot: &ReturnSnapshot) -> Result<ReturnOutcome, ReturnEngineError> {
        let key = return_lock(snapshot.shop_id, &snapshot.return_sn);
        let Some(lock) = LeaseLock::acquire_with_retry(Arc::clone(&self.kv), key, RETURN_LOCK_TTL, LOCK_TRIES, LOCK_JITTER).await?
        else {
            debug!("↩️ Return {} is being handled elsewhere", snapshot.return_sn);
            return Ok(ReturnOutcome::Busy);
        };
        let result = self.store_and_refund(snapshot).await;
        if let Err(e) = lock.release().await {
            warn!("↩️ Could not release the lock of return {}: {e}", snapshot.return_sn);
        }
        result
    }

    async fn store_and_refund(&self, snapshot: &ReturnSnapshot) -> Result<ReturnOutcome, ReturnEngineError> {
        let confirmed = is_refund_confirmed(&snapshot.status);
        let mut tx = self.db.pool().begin().await?;
        let claimed = if returns::lock_return(snapshot.shop_id, &snapshot.return_sn, &mut tx).await? {
            let existing = returns::fetch_return(snapshot.shop_id, &snapshot.return_sn, &mut tx)
                .await?
                .ok_or_else(|| ReturnEngineError::ReturnNotFound(snapshot.return_sn.clone()))?;
            let claim = confirmed && existing.refund_status == RefundStatus::Unprocessed;
            let status = if claim { RefundStatus::Processing } else { existing.refund_status };
            returns::update_return(snapshot, status, &mut tx).await?;
            claim
        } else {
            let status = if confirmed { RefundStatus::Processing } else { RefundStatus::Unprocessed };
            returns::insert_return(snapshot, status, &mut tx).await?;
            confirmed
        };
        tx.commit().await?;

        let refund = if claimed {
            info!("↩️ Return {} of order {} is {}. Processing the refund", snapshot.return_sn, snapshot.order_sn, snapshot.status);
            Some(self.handle_refund(snapshot).await?)
        } else {
            None
        };
        let mut conn = self.db.pool().acquire().await?;
        let record = returns::fetch_return(snapshot.shop_id, &snapshot.return_sn, &mut conn)
            .await?
            .ok_or_else(|| ReturnEngineError::ReturnNotFound(snapshot.return_sn.clone()))?;
        Ok(ReturnOutcome::Stored { record, refund })
    }

    /// Runs the refund and turns any failure into a Failed return, which needs manual attention.
    async fn handle_refund(&self, snapshot: &ReturnSnapshot) -> Result<RefundResult, ReturnEngineError> {
        match self.process_refund(snapshot).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("↩️ Refund of return {} failed: {e}", snapshot.return_sn);
                let mut tx = self.db.pool().begin().await?;
                returns::transition_refund_status(
                    snapshot.shop_id,
                    &snapshot.return_sn,
                    RefundStatus::Processing,
                    RefundStatus::Failed,
                    Money::ZERO,
                    &e.to_string(),
                    &mut tx,
                )
                .await?;
                let log = NewOperationLog::new(snapshot.shop_id, &snapshot.order_sn, "refund_failed", e.to_string());
                operation_logs::insert_log(&log, &mut tx).await?;
                tx.commit().await?;
                Ok(RefundResult::Failed(e.to_string()))
            },
        }
    }

    async fn process_refund(&self, snapshot: &ReturnSnapshot) -> Result<RefundResult, ReturnEngineError> {
        let shop_id = snapshot.shop_id;
        let sn = snapshot.order_sn.as_str();
        let mut tx = self.db.pool().begin().await?;
        let order = if orders::lock_order(shop_id, sn, &mut tx).await? {
            orders::fetch_order(shop_id, sn, &mut tx).await?
        } else {
            None
        };
        let Some(order) = order.filter(|o| o.prepayment_status == PrepaymentStatus::Sufficient) else {
            returns::transition_refund_status(
                shop_id,
                &snapshot.return_sn,
                RefundStatus::Processing,
                RefundStatus::Skipped,
                Money::ZERO,
                "",
                &mut tx,
            )
            .await?;
            tx.commit().await?;
            debug!("↩️ Order {sn} holds no prepayment. Return {} skipped", snapshot.return_sn);
            return Ok(RefundResult::Skipped);
        };
        let shop = shops::fetch_shop(shop_id, &mut tx).await?.ok_or(ReturnEngineError::ShopNotFound(shop_id))?;

        let wanted = snapshot.refund_amount.min(order.total_amount);
        let unfreeze = wanted.min(order.frozen_amount);
        let remark = format!("return {}", snapshot.return_sn);
        if unfreeze.is_positive() {
            ledger::unfreeze_prepayment(shop.admin_id, unfreeze, sn, &remark, &mut tx).await?;
            let shipped = shipments::fetch_record(shop_id, sn, &mut tx)
                .await?
                .map(|r| r.status == ShipmentStatus::Shipped)
                .unwrap_or(false);
            if shipped {
                if let Err(e) = ledger::transfer_from_escrow(shop.admin_id, unfreeze, sn, &remark, &mut tx).await {
                    warn!("↩️ Escrow could not return {unfreeze} for {sn}: {e}");
                }
            }
        }
        if wanted > unfreeze {
            let detail = format!(
                "return {} asks for {wanted} but only {} is still frozen",
                snapshot.return_sn, order.frozen_amount
            );
            warn!("↩️ Over-refund on order {sn}: {detail}");
            operation_logs::insert_log(&NewOperationLog::new(shop_id, sn, "over_refund", detail), &mut tx).await?;
        }
        let full_refund = snapshot.refund_amount >= order.total_amount;
        orders::set_frozen(shop_id, sn, order.frozen_amount - unfreeze, full_refund, &mut tx).await?;
        let moved = returns::transition_refund_status(
            shop_id,
            &snapshot.return_sn,
            RefundStatus::Processing,
            RefundStatus::Processed,
            unfreeze,
            "",
            &mut tx,
        )
        .await?;
        if !moved {
            return Err(ReturnEngineError::NotProcessing(snapshot.return_sn.clone()));
        }
        tx.commit().await?;
        info!("↩️ Return {} released {unfreeze} of prepayment for order {sn}", snapshot.return_sn);
        Ok(RefundResult::Processed { unfrozen: unfreeze })
    }

    pub async fn fetch_return(&self, shop_id: i64, return_sn: &str) -> Result<Option<ReturnRecord>, ReturnEngineError> {
        let mut conn = self.db.pool().acquire().await?;
        let record = returns::fetch_return(shop_id, return_sn, &mut conn).await?;
        Ok(record)
    }

    pub async fn returns_for_order(&self, shop_id: i64, order_sn: &str) -> Result<Vec<ReturnRecord>, ReturnEngineError> {
        let mut conn = self.db.pool().acquire().await?;
        let records = returns::fetch_returns_for_order(shop_id, order_sn, &mut conn).await?;
        Ok(records)
    }
}
