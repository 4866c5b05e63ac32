//! Distributed order sync (C8).
//!
//! Three loops cooperate. The scheduler tick runs on every node, but only the node that wins the tick's lease
//! enqueues the shops. The dispatcher on each node pops shop ids off the shared queue and hands them to a bounded
//! pool of workers. A worker takes the shop's lease, keeps it alive while it runs the patrols, and gives it back.
use std::{fmt::Debug, sync::Arc, time::Duration};

use log::*;
use shopee_tools::helpers::unix_now;
use tokio::{sync::Semaphore, task::JoinHandle};

use crate::{
    balance_api::errors::SyncError,
    db::{shops, sync_records},
    db_types::{SyncRecordStatus, SyncType},
    kv::{
        shop_sync_lock,
        KvStore,
        LeaseLock,
        SCHEDULER_LOCK,
        SCHEDULER_LOCK_TTL,
        SHOP_PROCESSING,
        SHOP_QUEUE,
        SHOP_SYNC_LOCK_TTL,
    },
    workers::{
        dispatch_from_queue,
        patrol::{Patrol, PatrolReport, ReturnPatrolReport},
        Shutdown,
        WorkerSettings,
    },
    SqliteDatabase,
};

const REQUEUE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    Completed { orders: PatrolReport, returns: Option<ReturnPatrolReport> },
    /// Another worker, or a manual sync, holds the shop's lease.
    Busy,
}

#[derive(Clone)]
pub struct SyncScheduler {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    patrol: Patrol,
    settings: WorkerSettings,
    permits: Arc<Semaphore>,
}

impl Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncScheduler({} workers)", self.settings.sync_workers)
    }
}

impl SyncScheduler {
    pub fn new(db: SqliteDatabase, kv: Arc<dyn KvStore>, patrol: Patrol, settings: WorkerSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.sync_workers.max(1)));
        Self { db, kv, patrol, settings, permits }
    }

    /// One scheduler tick. Returns the number of shops enqueued, or `None` if a peer node won this tick.
    ///
    /// The tick's lease is not released. It expires on its own, so a peer whose clock fires a little later in the
    /// same period still finds it held.
    pub async fn schedule_tick(&self) -> Result<Option<usize>, SyncError> {
        let Some(_lease) = LeaseLock::try_acquire(Arc::clone(&self.kv), SCHEDULER_LOCK, SCHEDULER_LOCK_TTL).await?
        else {
            debug!("🕰️ Another node is scheduling this tick. Skipping");
            return Ok(None);
        };
        let shops = {
            let mut conn = self.db.pool().acquire().await?;
            let mut runnable = Vec::new();
            for shop in shops::fetch_authorized_shops(false, &mut conn).await? {
                let record = sync_records::fetch_or_create(shop.shop_id, SyncType::Order, &mut conn).await?;
                if record.status == SyncRecordStatus::Enabled {
                    runnable.push(shop.shop_id);
                } else {
                    trace!("🕰️ Order sync of shop {} is {:?}. Not scheduling", shop.shop_id, record.status);
                }
            }
            runnable
        };
        for shop_id in &shops {
            self.kv.lpush(SHOP_QUEUE, &shop_id.to_string()).await?;
        }
        info!("🕰️ Enqueued {} shops for order sync", shops.len());
        Ok(Some(shops.len()))
    }

    /// The worker body: patrols one shop under its lease. Also used by manual syncs.
    pub async fn sync_shop(&self, shop_id: i64) -> Result<SyncRun, SyncError> {
        let Some(lease) = LeaseLock::try_acquire(Arc::clone(&self.kv), shop_sync_lock(shop_id), SHOP_SYNC_LOCK_TTL).await?
        else {
            debug!("🕰️ Shop {shop_id} is already being synced");
            return Ok(SyncRun::Busy);
        };
        let extender = lease.start_extender();
        let member = shop_id.to_string();
        if let Err(e) = self.kv.sadd(SHOP_PROCESSING, &member).await {
            warn!("🕰️ Could not mark shop {shop_id} as processing: {e}");
        }

        let result = self.run_patrols(shop_id).await;

        let lost = extender.is_lost();
        extender.stop().await;
        if let Err(e) = self.kv.srem(SHOP_PROCESSING, &member).await {
            warn!("🕰️ Could not clear the processing mark of shop {shop_id}: {e}");
        }
        if let Err(e) = lease.release().await {
            warn!("🕰️ Could not release the sync lease of shop {shop_id}: {e}");
        }
        if lost {
            warn!("🕰️ The sync lease of shop {shop_id} expired while it was being patrolled");
        }
        self.record_outcome(shop_id, &result).await?;
        result
    }

    /// Runs a sync now, sharing the lease with the scheduled workers.
    pub async fn trigger_shop_sync(&self, shop_id: i64) -> Result<SyncRun, SyncError> {
        match self.sync_shop(shop_id).await? {
            SyncRun::Busy => Err(SyncError::AlreadyRunning(shop_id)),
            run => {
                info!("🕰️ Manual sync of shop {shop_id} finished");
                Ok(run)
            },
        }
    }

    async fn run_patrols(&self, shop_id: i64) -> Result<SyncRun, SyncError> {
        let shop = {
            let mut conn = self.db.pool().acquire().await?;
            shops::fetch_shop(shop_id, &mut conn).await?.ok_or(SyncError::ShopNotFound(shop_id))?
        };
        let orders = tokio::time::timeout(self.settings.patrol_timeout, self.patrol.patrol_orders(&shop))
            .await
            .map_err(|_| SyncError::Timeout("order patrol"))??;
        let returns = match tokio::time::timeout(self.settings.returns_timeout, self.patrol.patrol_returns(&shop)).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!("↩️ Return patrol of shop {shop_id} failed: {e}");
                None
            },
            Err(_) => {
                warn!("↩️ Return patrol of shop {shop_id} timed out");
                None
            },
        };
        Ok(SyncRun::Completed { orders, returns })
    }

    async fn record_outcome(&self, shop_id: i64, result: &Result<SyncRun, SyncError>) -> Result<(), SyncError> {
        let mut conn = self.db.pool().acquire().await?;
        sync_records::fetch_or_create(shop_id, SyncType::Order, &mut conn).await?;
        match result {
            Ok(SyncRun::Completed { orders, .. }) => {
                sync_records::record_success(shop_id, SyncType::Order, unix_now(), 0, orders.upserted as i64, &mut conn)
                    .await?;
            },
            Ok(SyncRun::Busy) => {},
            Err(e) => {
                let record = sync_records::record_failure(shop_id, SyncType::Order, &e.to_string(), &mut conn).await?;
                if record.status == SyncRecordStatus::Paused {
                    error!(
                        "🕰️ Order sync of shop {shop_id} paused after {} consecutive failures. Last error: {e}",
                        record.consecutive_fail_count
                    );
                } else {
                    warn!("🕰️ Order sync of shop {shop_id} failed: {e}");
                }
            },
        }
        Ok(())
    }

    async fn handle_queued(&self, shop_id: i64) {
        match self.sync_shop(shop_id).await {
            Ok(SyncRun::Busy) => {
                if let Err(e) = self.kv.lpush(SHOP_QUEUE, &shop_id.to_string()).await {
                    warn!("🕰️ Could not requeue shop {shop_id}: {e}");
                }
            },
            Ok(SyncRun::Completed { orders, .. }) => {
                debug!("🕰️ Shop {shop_id} synced. {} orders written", orders.upserted);
            },
            Err(e) => debug!("🕰️ Shop {shop_id} sync failed: {e}"),
        }
    }

    /// Pops one shop off the queue and hands it to a free worker. Returns false when the queue was empty.
    pub async fn dispatch_one(&self) -> Result<bool, SyncError> {
        let this = self.clone();
        let dispatched =
            dispatch_from_queue(&self.kv, SHOP_QUEUE, self.settings.queue_poll, &self.permits, move |shop_id| async move {
                this.handle_queued(shop_id).await
            })
            .await?;
        Ok(dispatched)
    }

    /// Starts the scheduler tick and the dispatcher. Neither handle needs to be awaited; both exit on shutdown.
    pub fn start(self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let ticker = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!("🕰️ Order sync scheduler started. Tick every {:?}", this.settings.sync_interval);
                loop {
                    if let Err(e) = this.schedule_tick().await {
                        error!("🕰️ Order sync tick failed: {e}");
                    }
                    if !shutdown.sleep(this.settings.sync_interval).await {
                        break;
                    }
                }
                info!("🕰️ Order sync scheduler stopped");
            })
        };
        let dispatcher = {
            let mut shutdown = shutdown;
            tokio::spawn(async move {
                info!("🕰️ Order sync dispatcher started with {} workers", self.settings.sync_workers);
                loop {
                    tokio::select! {
                        _ = shutdown.stopped() => break,
                        result = self.dispatch_one() => {
                            if let Err(e) = result {
                                error!("🕰️ Order sync dispatcher error: {e}");
                                if !shutdown.sleep(REQUEUE_BACKOFF).await {
                                    break;
                                }
                            }
                        }
                    }
                }
                info!("🕰️ Order sync dispatcher stopped");
            })
        };
        vec![ticker, dispatcher]
    }
}
