use std::{fmt::Debug, sync::Arc, time::Duration};

use balance_common::Money;
use log::*;
use shopee_tools::data_objects::ShipMethod;

use crate::{
    balance_api::{errors::ShipmentError, shop_api::ShopApi},
    db::{operation_logs, orders, shipments, shipments::NewShipmentRecord, shops},
    db_types::{NewOperationLog, OrderShipmentRecord, OrderStatus, PrepaymentStatus, ShipmentStatus},
    ledger,
    traits::Marketplace,
    SqliteDatabase,
};

const SHIP_TIMEOUT: Duration = Duration::from_secs(30);

/// What an operator submits when shipping an order.
#[derive(Debug, Clone)]
pub struct ShipRequest {
    pub shop_id: i64,
    pub order_sn: String,
    pub operator_id: i64,
    pub goods_cost: Money,
    pub shipping_cost: Money,
    pub method: Option<ShipMethod>,
}

/// The operator ship action. Moves the order's frozen prepayment into escrow custody and tells the marketplace.
#[derive(Clone)]
pub struct ShipmentApi {
    db: SqliteDatabase,
    shops: ShopApi,
    marketplace: Arc<dyn Marketplace>,
}

impl Debug for ShipmentApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShipmentApi")
    }
}

impl ShipmentApi {
    pub fn new(db: SqliteDatabase, shops: ShopApi, marketplace: Arc<dyn Marketplace>) -> Self {
        Self { db, shops, marketplace }
    }

    /// Records the shipment and calls the marketplace. If the marketplace call fails the record is marked Failed and
    /// the escrow transfer is reversed, so the order can be shipped again.
    pub async fn ship_order(&self, req: &ShipRequest) -> Result<OrderShipmentRecord, ShipmentError> {
        if req.goods_cost.is_negative() || req.shipping_cost.is_negative() {
            return Err(ShipmentError::InvalidCost);
        }
        let record = self.record_shipment(req).await?;
        match self.notify_marketplace(req).await {
            Ok(()) => {
                info!(
                    "🚚️ Order {} shipped by operator {}. {} held in escrow",
                    req.order_sn, req.operator_id, record.frozen_amount
                );
                Ok(record)
            },
            Err(e) => {
                warn!("🚚️ The marketplace refused to ship {}: {e}. Reverting", req.order_sn);
                self.revert(&record, &e.to_string()).await?;
                Err(e)
            },
        }
    }

    async fn record_shipment(&self, req: &ShipRequest) -> Result<OrderShipmentRecord, ShipmentError> {
        let sn = req.order_sn.as_str();
        let mut tx = self.db.pool().begin().await?;
        if !orders::lock_order(req.shop_id, sn, &mut tx).await? {
            return Err(ShipmentError::OrderNotFound(sn.to_string()));
        }
        let order = orders::fetch_order(req.shop_id, sn, &mut tx)
            .await?
            .ok_or_else(|| ShipmentError::OrderNotFound(sn.to_string()))?;
        let not_shippable = |reason: String| ShipmentError::NotShippable { order_sn: sn.to_string(), reason };
        if order.status() != OrderStatus::ReadyToShip {
            return Err(not_shippable(format!("status is {}", order.order_status)));
        }
        if order.prepayment_status != PrepaymentStatus::Sufficient {
            return Err(not_shippable(format!("prepayment is {}", order.prepayment_status)));
        }
        let shop = shops::fetch_shop(req.shop_id, &mut tx).await?.ok_or(ShipmentError::ShopNotFound(req.shop_id))?;
        if !shops::is_operator_of(req.shop_id, req.operator_id, &mut tx).await? {
            return Err(ShipmentError::NotOperator { shop_id: req.shop_id, operator_id: req.operator_id });
        }
        if let Some(existing) = shipments::fetch_record(req.shop_id, sn, &mut tx).await? {
            if matches!(existing.status, ShipmentStatus::Shipped | ShipmentStatus::Completed) {
                return Err(ShipmentError::AlreadyShipped(sn.to_string()));
            }
        }
        let frozen = order.frozen_amount;
        let freeze_transaction_no = if frozen.is_positive() {
            ledger::transfer_to_escrow(shop.admin_id, frozen, sn, &mut tx).await?.transaction_no
        } else {
            String::new()
        };
        let new_record = NewShipmentRecord {
            shop_id: req.shop_id,
            order_sn: sn.to_string(),
            operator_id: req.operator_id,
            shop_owner_id: shop.admin_id,
            goods_cost: req.goods_cost,
            shipping_cost: req.shipping_cost,
            frozen_amount: frozen,
            freeze_transaction_no,
            ship_method: ship_method_name(req.method.as_ref()).to_string(),
        };
        let record = shipments::insert_shipped(&new_record, &mut tx).await?;
        let detail = format!("goods {}, shipping {}, escrow {frozen}", req.goods_cost, req.shipping_cost);
        let log = NewOperationLog::new(req.shop_id, sn, "ship_order", detail).by(req.operator_id);
        operation_logs::insert_log(&log, &mut tx).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn notify_marketplace(&self, req: &ShipRequest) -> Result<(), ShipmentError> {
        let auth = self.shops.shop_auth(req.shop_id).await?;
        let call = self.marketplace.ship_order(&auth, &req.order_sn, req.method.clone());
        match tokio::time::timeout(SHIP_TIMEOUT, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if e.is_token_expired() {
                    self.shops.invalidate_token(req.shop_id).await?;
                }
                Err(e.into())
            },
            Err(_) => Err(ShipmentError::Timeout),
        }
    }

    async fn revert(&self, record: &OrderShipmentRecord, reason: &str) -> Result<(), ShipmentError> {
        let mut tx = self.db.pool().begin().await?;
        shipments::lock_record(record.shop_id, &record.order_sn, &mut tx).await?;
        if record.frozen_amount.is_positive() {
            ledger::transfer_from_escrow(record.shop_owner_id, record.frozen_amount, &record.order_sn, "ship failed", &mut tx)
                .await?;
        }
        shipments::set_status(record.shop_id, &record.order_sn, ShipmentStatus::Failed, reason, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_record(&self, shop_id: i64, order_sn: &str) -> Result<Option<OrderShipmentRecord>, ShipmentError> {
        let mut conn = self.db.pool().acquire().await?;
        let record = shipments::fetch_record(shop_id, order_sn, &mut conn).await?;
        Ok(record)
    }
}

fn ship_method_name(method: Option<&ShipMethod>) -> &'static str {
    match method {
        Some(ShipMethod::Pickup { .. }) => "pickup",
        Some(ShipMethod::Dropoff { .. }) => "dropoff",
        Some(ShipMethod::NonIntegrated { .. }) => "non_integrated",
        None => "default",
    }
}
