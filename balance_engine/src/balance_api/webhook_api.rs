use std::{fmt::Debug, sync::Arc};

use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    balance_api::{
        errors::{OrderEngineError, WebhookError},
        order_api::{OrderApi, StatusPush},
        return_api::{ReturnApi, ReturnOutcome},
        shop_api::ShopApi,
    },
    db::operation_logs,
    db_types::{NewOperationLog, OrderStatus, ReturnSnapshot},
    kv::{
        order_lock,
        order_update_time,
        return_dedup,
        webhook_dedup,
        KvStore,
        LeaseLock,
        ORDER_LOCK_TTL,
        ORDER_UPDATE_TIME_TTL,
        WEBHOOK_DEDUP_TTL,
    },
    traits::Marketplace,
    SqliteDatabase,
};

pub const CODE_ORDER_STATUS: i32 = 3;
pub const CODE_TRACKING: i32 = 4;
pub const CODE_BUYER_CANCEL: i32 = 5;
pub const CODE_RETURN_CREATED: i32 = 6;
pub const CODE_CANCEL: i32 = 9;
pub const CODE_RESERVED_STOCK: i32 = 10;
pub const CODE_RETURN_STATUS: i32 = 15;

/// The envelope of every marketplace push.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookEvent {
    pub code: i32,
    pub shop_id: i64,
    pub timestamp: i64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OrderStatusData {
    #[serde(rename = "ordersn")]
    order_sn: String,
    status: String,
    update_time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TrackingData {
    #[serde(rename = "ordersn")]
    order_sn: String,
    #[serde(rename = "tracking_no")]
    tracking_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CancelData {
    #[serde(rename = "ordersn")]
    order_sn: String,
    cancel_by: String,
    cancel_reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ReturnData {
    #[serde(rename = "returnsn")]
    return_sn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// The order was fetched from the marketplace and stored in full.
    Refreshed,
    Duplicate,
    /// Another worker holds the order's lock.
    Busy,
    Stale,
    /// The status lock or the priority order kept the current status.
    Blocked,
    Ignored,
    Failed(String),
}

/// Webhook engine (C11). Never fails outward: errors are logged and written to the operation log.
#[derive(Clone)]
pub struct WebhookApi {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    orders: OrderApi,
    returns: ReturnApi,
    shops: ShopApi,
    marketplace: Arc<dyn Marketplace>,
}

impl Debug for WebhookApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi")
    }
}

fn parse<T: DeserializeOwned>(data: &serde_json::Value) -> Result<T, WebhookError> {
    serde_json::from_value(data.clone()).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

impl WebhookApi {
    pub fn new(
        db: SqliteDatabase,
        kv: Arc<dyn KvStore>,
        orders: OrderApi,
        returns: ReturnApi,
        shops: ShopApi,
        marketplace: Arc<dyn Marketplace>,
    ) -> Self {
        Self { db, kv, orders, returns, shops, marketplace }
    }

    pub async fn handle(&self, event: WebhookEvent) -> WebhookOutcome {
        let result = match event.code {
            CODE_ORDER_STATUS => self.order_status(&event).await,
            CODE_TRACKING => self.tracking(&event).await,
            CODE_BUYER_CANCEL | CODE_CANCEL => self.cancel(&event).await,
            CODE_RETURN_CREATED | CODE_RETURN_STATUS => self.return_event(&event).await,
            CODE_RESERVED_STOCK => {
                debug!("🪝️ Reserved stock push for shop {}: {}", event.shop_id, event.data);
                Ok(WebhookOutcome::Ignored)
            },
            code => {
                info!("🪝️ Unknown push code {code} for shop {}. Ignoring", event.shop_id);
                Ok(WebhookOutcome::Ignored)
            },
        };
        match result {
            Ok(outcome) => {
                trace!("🪝️ Push {} for shop {}: {outcome:?}", event.code, event.shop_id);
                outcome
            },
            Err(e) => {
                warn!("🪝️ Push {} for shop {} failed: {e}", event.code, event.shop_id);
                let sn = event.data.get("ordersn").and_then(|v| v.as_str()).unwrap_or_default();
                let detail = format!("code {}: {e}", event.code);
                self.log(event.shop_id, sn, "webhook_error", detail).await;
                WebhookOutcome::Failed(e.to_string())
            },
        }
    }

    async fn order_status(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let data: OrderStatusData = parse(&event.data)?;
        let shop_id = event.shop_id;
        let sn = data.order_sn.as_str();
        if !self.first_delivery(shop_id, sn, event).await? {
            return Ok(WebhookOutcome::Duplicate);
        }
        let Some(lock) = self.order_lock(shop_id, sn).await? else {
            return Ok(WebhookOutcome::Busy);
        };
        let outcome = self.apply_order_status(shop_id, &data).await;
        release(lock).await;
        let outcome = outcome?;
        if matches!(outcome, WebhookOutcome::Applied | WebhookOutcome::Refreshed) {
            self.log(shop_id, sn, "order_status", event.data.to_string()).await;
        }
        Ok(outcome)
    }

    async fn apply_order_status(&self, shop_id: i64, data: &OrderStatusData) -> Result<WebhookOutcome, WebhookError> {
        let sn = data.order_sn.as_str();
        if data.update_time > 0 {
            let key = order_update_time(shop_id, sn);
            if !self.kv.check_and_set_greater(&key, data.update_time, ORDER_UPDATE_TIME_TTL).await? {
                return Ok(WebhookOutcome::Stale);
            }
        }
        if data.status == OrderStatus::ReadyToShip.as_str() {
            // Freezing needs the full detail, so fetch the order rather than patching the status.
            return match self.orders.refresh_one(shop_id, sn).await? {
                o if o.is_stored() => Ok(WebhookOutcome::Refreshed),
                _ => Ok(WebhookOutcome::Blocked),
            };
        }
        match self.orders.apply_status_push(shop_id, sn, &data.status).await? {
            StatusPush::Applied => Ok(WebhookOutcome::Applied),
            StatusPush::Blocked(_) => Ok(WebhookOutcome::Blocked),
            StatusPush::Missing => {
                self.orders.refresh_one(shop_id, sn).await?;
                Ok(WebhookOutcome::Refreshed)
            },
        }
    }

    async fn tracking(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let data: TrackingData = parse(&event.data)?;
        let sn = data.order_sn.as_str();
        if !self.first_delivery(event.shop_id, sn, event).await? {
            return Ok(WebhookOutcome::Duplicate);
        }
        let Some(lock) = self.order_lock(event.shop_id, sn).await? else {
            return Ok(WebhookOutcome::Busy);
        };
        let result = self.orders.update_tracking(event.shop_id, sn, &data.tracking_number).await;
        release(lock).await;
        match result? {
            true => Ok(WebhookOutcome::Applied),
            false => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn cancel(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let data: CancelData = parse(&event.data)?;
        let sn = data.order_sn.as_str();
        if !self.first_delivery(event.shop_id, sn, event).await? {
            return Ok(WebhookOutcome::Duplicate);
        }
        let Some(lock) = self.order_lock(event.shop_id, sn).await? else {
            return Ok(WebhookOutcome::Busy);
        };
        let reason = format!("cancelled by {}: {}", data.cancel_by, data.cancel_reason);
        let result = self.orders.cancel_order(event.shop_id, sn, &reason).await;
        release(lock).await;
        match result {
            Ok(_) => Ok(WebhookOutcome::Applied),
            Err(OrderEngineError::OrderNotFound(_)) => {
                debug!("🪝️ Cancel push for unknown order {sn}. Ignoring");
                Ok(WebhookOutcome::Ignored)
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn return_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        let data: ReturnData = parse(&event.data)?;
        if data.return_sn.is_empty() {
            return Err(WebhookError::InvalidPayload("return push without a return number".into()));
        }
        let key = return_dedup(event.shop_id, &data.return_sn, event.code);
        if !self.kv.set_nx_ex(&key, "1", WEBHOOK_DEDUP_TTL).await? {
            return Ok(WebhookOutcome::Duplicate);
        }
        let auth = self.shops.shop_auth(event.shop_id).await?;
        let detail = self.marketplace.get_return_detail(&auth, &data.return_sn).await?;
        let snapshot = ReturnSnapshot::from_detail(event.shop_id, &detail);
        self.log(event.shop_id, &snapshot.order_sn, "return_event", event.data.to_string()).await;
        match self.returns.upsert_return(&snapshot).await? {
            ReturnOutcome::Busy => Ok(WebhookOutcome::Busy),
            ReturnOutcome::Stored { .. } => Ok(WebhookOutcome::Applied),
        }
    }

    async fn first_delivery(&self, shop_id: i64, sn: &str, event: &WebhookEvent) -> Result<bool, WebhookError> {
        if sn.is_empty() {
            return Err(WebhookError::InvalidPayload("push without an order number".into()));
        }
        let key = webhook_dedup(shop_id, sn, event.code, event.timestamp);
        Ok(self.kv.set_nx_ex(&key, "1", WEBHOOK_DEDUP_TTL).await?)
    }

    async fn order_lock(&self, shop_id: i64, sn: &str) -> Result<Option<LeaseLock>, WebhookError> {
        Ok(LeaseLock::try_acquire(Arc::clone(&self.kv), order_lock(shop_id, sn), ORDER_LOCK_TTL).await?)
    }

    async fn log(&self, shop_id: i64, order_sn: &str, action: &str, detail: String) {
        let result = match self.db.pool().acquire().await {
            Ok(mut conn) => {
                operation_logs::insert_log(&NewOperationLog::new(shop_id, order_sn, action, detail), &mut conn).await
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("🪝️ Could not write the operation log: {e}");
        }
    }
}

async fn release(lock: LeaseLock) {
    let key = lock.key().to_string();
    if let Err(e) = lock.release().await {
        warn!("🪝️ Could not release {key}: {e}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope() {
        let json = r#"{"code":3,"shop_id":77,"timestamp":1717200000,"data":{"ordersn":"SN1","status":"SHIPPED","update_time":5}}"#;
        let event: WebhookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.code, CODE_ORDER_STATUS);
        let data: OrderStatusData = parse(&event.data).unwrap();
        assert_eq!(data.order_sn, "SN1");
        assert_eq!(data.update_time, 5);
    }

    #[test]
    fn bad_payload() {
        let err = parse::<OrderStatusData>(&serde_json::json!({"ordersn": 5})).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }
}
