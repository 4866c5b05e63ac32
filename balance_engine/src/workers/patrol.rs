//! The per-shop reconciliation body run by the sync workers: an order patrol over the recent update-time range and
//! a return patrol over the last fifteen days.
use std::{fmt::Debug, sync::Arc};

use log::*;
use shopee_tools::{
    data_objects::{OrderListQuery, ReturnListEntry, TimeRangeField},
    helpers::{time_windows, unix_now},
    ShopAuth,
    ShopeeApiError,
    DETAIL_BATCH_LIMIT,
    MAX_TIME_RANGE_SECS,
};

use crate::{
    balance_api::{
        errors::SyncError,
        order_api::{OrderApi, UpsertOutcome},
        return_api::{ReturnApi, ReturnOutcome},
        shop_api::ShopApi,
    },
    db::{orders, returns, shops},
    db_types::{OrderSnapshot, ReturnSnapshot, Shop},
    traits::Marketplace,
    SqliteDatabase,
};

/// Orders are never patrolled further back than this.
pub const LOOKBACK_SECS: i64 = 30 * 24 * 60 * 60;
pub const RETURN_LOOKBACK_SECS: i64 = 15 * 24 * 60 * 60;
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatrolReport {
    pub windows: usize,
    pub listed: usize,
    pub upserted: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnPatrolReport {
    pub listed: usize,
    pub upserted: usize,
    pub busy: usize,
}

#[derive(Clone)]
pub struct Patrol {
    db: SqliteDatabase,
    shops: ShopApi,
    orders: OrderApi,
    returns: ReturnApi,
    marketplace: Arc<dyn Marketplace>,
}

impl Debug for Patrol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Patrol")
    }
}

impl Patrol {
    pub fn new(
        db: SqliteDatabase,
        shops: ShopApi,
        orders: OrderApi,
        returns: ReturnApi,
        marketplace: Arc<dyn Marketplace>,
    ) -> Self {
        Self { db, shops, orders, returns, marketplace }
    }

    /// Walks `[max(last_sync_at, now - 30d), now]` in windows of at most fifteen days. Each window's orders are
    /// compared with the local copies in batches, and only missing or stale orders are written. The shop's
    /// watermark advances after every completed window, so an interrupted patrol keeps its progress.
    pub async fn patrol_orders(&self, shop: &Shop) -> Result<PatrolReport, SyncError> {
        let now = unix_now();
        let from = shop.last_sync_at.max(now - LOOKBACK_SECS);
        let auth = self.shops.shop_auth(shop.shop_id).await?;
        let mut report = PatrolReport::default();
        for (start, end) in time_windows(from, now, MAX_TIME_RANGE_SECS) {
            let order_sns = self.list_orders(&auth, start, end).await?;
            report.listed += order_sns.len();
            for batch in order_sns.chunks(DETAIL_BATCH_LIMIT) {
                self.reconcile_batch(&auth, batch, &mut report).await?;
            }
            let mut conn = self.db.pool().acquire().await?;
            shops::set_last_sync_at(shop.shop_id, end, &mut conn).await?;
            report.windows += 1;
        }
        debug!("🔄️ Order patrol of shop {} done: {report:?}", shop.shop_id);
        Ok(report)
    }

    async fn list_orders(&self, auth: &ShopAuth, from: i64, to: i64) -> Result<Vec<String>, SyncError> {
        let mut result = Vec::new();
        let mut cursor = None;
        loop {
            let query = OrderListQuery {
                time_field: TimeRangeField::UpdateTime,
                from,
                to,
                page_size: PAGE_SIZE,
                cursor: cursor.take(),
                status: None,
            };
            let page = match self.marketplace.get_order_list(auth, &query).await {
                Ok(page) => page,
                Err(e) => return Err(self.call_failed(auth, e).await),
            };
            result.extend(page.order_list.into_iter().map(|o| o.order_sn));
            if !page.more || page.next_cursor.is_empty() {
                break;
            }
            cursor = Some(page.next_cursor);
        }
        Ok(result)
    }

    async fn reconcile_batch(&self, auth: &ShopAuth, batch: &[String], report: &mut PatrolReport) -> Result<(), SyncError> {
        let local = {
            let mut conn = self.db.pool().acquire().await?;
            orders::fetch_statuses(auth.shop_id, batch, &mut conn).await?
        };
        let details = match self.marketplace.get_order_detail(auth, batch).await {
            Ok(details) => details,
            Err(e) => return Err(self.call_failed(auth, e).await),
        };
        for detail in details {
            let stale = match local.get(&detail.order_sn) {
                None => true,
                Some((status, update_time)) => *status != detail.order_status || *update_time < detail.update_time,
            };
            if !stale {
                report.unchanged += 1;
                continue;
            }
            let snapshot = OrderSnapshot::from_detail(auth.shop_id, &detail);
            match self.orders.upsert_from_sync(&snapshot).await? {
                UpsertOutcome::Stale => report.unchanged += 1,
                _ => report.upserted += 1,
            }
        }
        Ok(())
    }

    /// Lists returns updated in the last fifteen days and hands every new or changed one to the return engine.
    pub async fn patrol_returns(&self, shop: &Shop) -> Result<ReturnPatrolReport, SyncError> {
        let now = unix_now();
        let auth = self.shops.shop_auth(shop.shop_id).await?;
        let entries = self.list_returns(&auth, now - RETURN_LOOKBACK_SECS, now).await?;
        let known = {
            let mut conn = self.db.pool().acquire().await?;
            returns::fetch_statuses(shop.shop_id, &mut conn).await?
        };
        let mut report = ReturnPatrolReport { listed: entries.len(), ..Default::default() };
        for entry in entries.iter().filter(|e| known.get(&e.return_sn) != Some(&e.status)) {
            let detail = match self.marketplace.get_return_detail(&auth, &entry.return_sn).await {
                Ok(detail) => detail,
                Err(e) => return Err(self.call_failed(&auth, e).await),
            };
            let snapshot = ReturnSnapshot::from_detail(shop.shop_id, &detail);
            match self.returns.upsert_return(&snapshot).await? {
                ReturnOutcome::Busy => report.busy += 1,
                ReturnOutcome::Stored { .. } => report.upserted += 1,
            }
        }
        debug!("↩️ Return patrol of shop {} done: {report:?}", shop.shop_id);
        Ok(report)
    }

    async fn list_returns(&self, auth: &ShopAuth, from: i64, to: i64) -> Result<Vec<ReturnListEntry>, SyncError> {
        let mut result = Vec::new();
        let mut cursor = None;
        loop {
            let page = match self.marketplace.get_return_list(auth, from, to, PAGE_SIZE, cursor.take()).await {
                Ok(page) => page,
                Err(e) => return Err(self.call_failed(auth, e).await),
            };
            result.extend(page.return_list);
            if !page.more || page.next_cursor.is_empty() {
                break;
            }
            cursor = Some(page.next_cursor);
        }
        Ok(result)
    }

    /// Drops the cached token when the marketplace rejected it.
    async fn call_failed(&self, auth: &ShopAuth, e: ShopeeApiError) -> SyncError {
        if e.is_token_expired() {
            if let Err(err) = self.shops.invalidate_token(auth.shop_id).await {
                warn!("🔐️ Could not drop the cached token of shop {}: {err}", auth.shop_id);
            }
        }
        e.into()
    }
}
