//! Finance-income sync (C9): an incremental pull of each shop's wallet transactions.
//!
//! It mirrors the order sync with its own tick lease, queue and worker pool, so a slow wallet endpoint never starves
//! order patrols.
use std::{fmt::Debug, sync::Arc, time::Duration};

use log::*;
use tokio::{sync::Semaphore, task::JoinHandle};

use crate::{
    balance_api::{errors::SyncError, shop_api::ShopApi},
    db::{finance, shops, sync_records},
    db_types::{NewFinanceIncome, SyncRecordStatus, SyncType},
    kv::{
        finance_sync_lock,
        KvStore,
        LeaseLock,
        FINANCE_QUEUE,
        FINANCE_SCHEDULER_LOCK,
        SCHEDULER_LOCK_TTL,
        SHOP_SYNC_LOCK_TTL,
    },
    traits::Marketplace,
    workers::{dispatch_from_queue, Shutdown, WorkerSettings},
    SqliteDatabase,
};

const PAGE_SIZE: u32 = 100;
/// Guards against an endpoint that keeps answering `more`.
const MAX_PAGES: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceRun {
    Completed { inserted: usize, skipped: usize, watermark: i64 },
    Busy,
    /// The shop's finance sync is paused or disabled.
    Inactive,
}

#[derive(Clone)]
pub struct FinanceSync {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    shops: ShopApi,
    marketplace: Arc<dyn Marketplace>,
    settings: WorkerSettings,
    permits: Arc<Semaphore>,
}

impl Debug for FinanceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FinanceSync({} workers)", self.settings.finance_workers)
    }
}

impl FinanceSync {
    pub fn new(
        db: SqliteDatabase,
        kv: Arc<dyn KvStore>,
        shops: ShopApi,
        marketplace: Arc<dyn Marketplace>,
        settings: WorkerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.finance_workers.max(1)));
        Self { db, kv, shops, marketplace, settings, permits }
    }

    /// Enqueues every finance-enabled shop if this node wins the tick. Returns `None` otherwise.
    pub async fn schedule_tick(&self) -> Result<Option<usize>, SyncError> {
        let Some(_lease) =
            LeaseLock::try_acquire(Arc::clone(&self.kv), FINANCE_SCHEDULER_LOCK, SCHEDULER_LOCK_TTL).await?
        else {
            debug!("🕰️ Another node is scheduling this finance tick. Skipping");
            return Ok(None);
        };
        let shop_ids = {
            let mut conn = self.db.pool().acquire().await?;
            shops::fetch_authorized_shops(true, &mut conn).await?.into_iter().map(|s| s.shop_id).collect::<Vec<_>>()
        };
        for shop_id in &shop_ids {
            self.kv.lpush(FINANCE_QUEUE, &shop_id.to_string()).await?;
        }
        info!("🕰️ Enqueued {} shops for finance sync", shop_ids.len());
        Ok(Some(shop_ids.len()))
    }

    /// Pulls the wallet transactions created after the shop's watermark and stores the new ones.
    ///
    /// Pages are read newest first until a page reaches back past the watermark. Withdrawals are skipped. Rows are
    /// inserted only if their transaction id is new, so overlapping runs add nothing twice.
    pub async fn sync_shop_finance(&self, shop_id: i64) -> Result<FinanceRun, SyncError> {
        let Some(lease) =
            LeaseLock::try_acquire(Arc::clone(&self.kv), finance_sync_lock(shop_id), SHOP_SYNC_LOCK_TTL).await?
        else {
            return Ok(FinanceRun::Busy);
        };
        let extender = lease.start_extender();
        let result = self.pull(shop_id).await;
        extender.stop().await;
        if let Err(e) = lease.release().await {
            warn!("🕰️ Could not release the finance lease of shop {shop_id}: {e}");
        }
        if let Err(e) = &result {
            let mut conn = self.db.pool().acquire().await?;
            let record = sync_records::record_failure(shop_id, SyncType::FinanceIncome, &e.to_string(), &mut conn).await?;
            if record.status == SyncRecordStatus::Paused {
                error!("🕰️ Finance sync of shop {shop_id} paused after {} failures: {e}", record.consecutive_fail_count);
            } else {
                warn!("🕰️ Finance sync of shop {shop_id} failed: {e}");
            }
        }
        result
    }

    async fn pull(&self, shop_id: i64) -> Result<FinanceRun, SyncError> {
        let record = {
            let mut conn = self.db.pool().acquire().await?;
            sync_records::fetch_or_create(shop_id, SyncType::FinanceIncome, &mut conn).await?
        };
        if record.status != SyncRecordStatus::Enabled {
            trace!("🕰️ Finance sync of shop {shop_id} is {:?}", record.status);
            return Ok(FinanceRun::Inactive);
        }
        let auth = self.shops.shop_auth(shop_id).await?;
        let watermark = record.last_sync_time;
        let mut newest = (watermark, record.last_transaction_id);
        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for page_no in 1..=MAX_PAGES {
            let page = match self.marketplace.get_wallet_transaction_list(&auth, page_no, PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => {
                    if e.is_token_expired() {
                        self.shops.invalidate_token(shop_id).await?;
                    }
                    return Err(e.into());
                },
            };
            let reached_watermark = page.transaction_list.iter().any(|t| t.create_time <= watermark);
            let mut conn = self.db.pool().acquire().await?;
            for tx in page.transaction_list.iter().filter(|t| t.create_time > watermark) {
                if tx.is_withdrawal() {
                    skipped += 1;
                    continue;
                }
                if finance::insert_if_absent(&NewFinanceIncome::from_wallet(shop_id, tx), &mut conn).await? {
                    inserted += 1;
                } else {
                    skipped += 1;
                }
                newest = newest.max((tx.create_time, tx.transaction_id));
            }
            if reached_watermark || !page.more {
                break;
            }
        }
        let mut conn = self.db.pool().acquire().await?;
        sync_records::record_success(shop_id, SyncType::FinanceIncome, newest.0, newest.1, inserted as i64, &mut conn)
            .await?;
        debug!("🕰️ Finance sync of shop {shop_id}: {inserted} new rows, {skipped} skipped, watermark {}", newest.0);
        Ok(FinanceRun::Completed { inserted, skipped, watermark: newest.0 })
    }

    async fn handle_queued(&self, shop_id: i64) {
        match self.sync_shop_finance(shop_id).await {
            Ok(FinanceRun::Busy) => trace!("🕰️ Finance sync of shop {shop_id} is already running"),
            Ok(run) => trace!("🕰️ Finance sync of shop {shop_id}: {run:?}"),
            Err(e) => debug!("🕰️ Finance sync of shop {shop_id} failed: {e}"),
        }
    }

    pub fn start(self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let ticker = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!("🕰️ Finance sync scheduler started. Tick every {:?}", this.settings.finance_interval);
                loop {
                    if let Err(e) = this.schedule_tick().await {
                        error!("🕰️ Finance sync tick failed: {e}");
                    }
                    if !shutdown.sleep(this.settings.finance_interval).await {
                        break;
                    }
                }
            })
        };
        let dispatcher = {
            let mut shutdown = shutdown;
            tokio::spawn(async move {
                loop {
                    let this = self.clone();
                    let poll = self.settings.queue_poll;
                    tokio::select! {
                        _ = shutdown.stopped() => break,
                        result = dispatch_from_queue(&self.kv, FINANCE_QUEUE, poll, &self.permits, move |id| async move {
                            this.handle_queued(id).await
                        }) => {
                            if let Err(e) = result {
                                error!("🕰️ Finance sync dispatcher error: {e}");
                                if !shutdown.sleep(Duration::from_secs(1)).await {
                                    break;
                                }
                            }
                        }
                    }
                }
                info!("🕰️ Finance sync stopped");
            })
        };
        vec![ticker, dispatcher]
    }
}
