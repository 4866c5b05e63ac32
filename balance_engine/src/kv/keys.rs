use std::time::Duration;

pub const SCHEDULER_LOCK: &str = "sync:scheduler:lock";
pub const FINANCE_SCHEDULER_LOCK: &str = "sync:finance:scheduler:lock";
pub const SHOP_QUEUE: &str = "sync:shop:queue";
pub const FINANCE_QUEUE: &str = "sync:finance:queue";
pub const SHOP_PROCESSING: &str = "sync:shop:processing";

pub const ORDER_STATUS_TTL: Duration = Duration::from_secs(30 * 60);
pub const ORDER_UPDATE_TIME_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const ORDER_LOCK_TTL: Duration = Duration::from_secs(30);
pub const RETURN_LOCK_TTL: Duration = Duration::from_secs(30);
pub const SHOP_SYNC_LOCK_TTL: Duration = Duration::from_secs(60);
pub const SCHEDULER_LOCK_TTL: Duration = Duration::from_secs(60);
pub const MAINTENANCE_LOCK_TTL: Duration = Duration::from_secs(5 * 60);
pub const WEBHOOK_DEDUP_TTL: Duration = Duration::from_secs(60);
pub const PREPAYMENT_NOTIFIED_TTL: Duration = Duration::from_secs(30 * 60);

pub fn shop_sync_lock(shop_id: i64) -> String {
    format!("sync:lock:{shop_id}")
}

pub fn finance_sync_lock(shop_id: i64) -> String {
    format!("sync:finance:lock:{shop_id}")
}

pub fn maintenance_lock(job: &str) -> String {
    format!("maintenance:{job}")
}

pub fn order_lock(shop_id: i64, order_sn: &str) -> String {
    format!("order:lock:{shop_id}:{order_sn}")
}

pub fn order_status(shop_id: i64, order_sn: &str) -> String {
    format!("order:status:{shop_id}:{order_sn}")
}

pub fn order_update_time(shop_id: i64, order_sn: &str) -> String {
    format!("order:update_time:{shop_id}:{order_sn}")
}

pub fn webhook_dedup(shop_id: i64, sn: &str, code: i32, timestamp: i64) -> String {
    format!("webhook:dedup:{shop_id}:{sn}:{code}:{timestamp}")
}

pub fn shop_token(shop_id: i64) -> String {
    format!("shop:token:{shop_id}")
}

pub fn return_lock(shop_id: i64, return_sn: &str) -> String {
    format!("return:lock:{shop_id}:{return_sn}")
}

pub fn prepayment_notified(shop_id: i64) -> String {
    format!("prepayment:notified:{shop_id}")
}

pub fn return_dedup(shop_id: i64, return_sn: &str, code: i32) -> String {
    format!("webhook:return:{shop_id}:{return_sn}:{code}")
}
