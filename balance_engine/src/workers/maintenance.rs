//! Maintenance scheduler (C10).
//!
//! A single ticker on every node decides which jobs are due. Each job then runs only on the node that wins the job's
//! lease. Leases are one try and are left to expire rather than released, so a peer that ticks a moment later in the
//! same run window skips the job instead of repeating it. Every job is idempotent, so a job that outlives its lease
//! and overlaps with a peer does no damage.
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use balance_common::Money;
use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use log::*;
use tokio::task::JoinHandle;

use crate::{
    balance_api::{errors::MaintenanceError, errors::SettlementError, settlement_api::SettlementApi},
    db::{finance, operation_logs, settlements, shipments, shops, stats},
    db_types::{PlatformDailyStat, SettlementStatus, ESCROW_ADJUSTMENT, ESCROW_VERIFIED_ADD},
    kv::{maintenance_lock, KvStore, LeaseLock, MAINTENANCE_LOCK_TTL},
    shard::all_shards,
    workers::{
        adjustment::{AdjustmentOutcome, AdjustmentPolicy, ManualReview},
        Shutdown,
    },
    SqliteDatabase,
};

pub const ARCHIVE_AFTER_DAYS: i64 = 90;
pub const PURGE_AFTER_DAYS: i64 = 365;
pub const STATS_BACKFILL_DAYS: u64 = 30;
const ARCHIVE_BATCH: i64 = 1000;
const ARCHIVE_YIELD: Duration = Duration::from_millis(100);
const ADJUSTMENT_BATCH: i64 = 500;
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const TICK: Duration = Duration::from_secs(60);
/// Minutes after the scheduled hour during which a daily job still counts as due.
const RUN_WINDOW_MINUTES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceJob {
    /// 02:00 UTC daily.
    ArchiveLogs,
    /// 03:00 UTC daily, for the previous day.
    DailyStats,
    /// 04:00 UTC on the first of the month.
    PurgeArchive,
    SettlementSweep,
    AdjustmentSweep,
}

impl MaintenanceJob {
    pub const ALL: [MaintenanceJob; 5] = [
        MaintenanceJob::ArchiveLogs,
        MaintenanceJob::DailyStats,
        MaintenanceJob::PurgeArchive,
        MaintenanceJob::SettlementSweep,
        MaintenanceJob::AdjustmentSweep,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ArchiveLogs => "archive_logs",
            Self::DailyStats => "daily_stats",
            Self::PurgeArchive => "purge_archive",
            Self::SettlementSweep => "settlement_sweep",
            Self::AdjustmentSweep => "adjustment_sweep",
        }
    }

    /// Whether the job should run at `now`, given when this node last ran it.
    pub fn is_due(&self, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
        let in_window = |hour: u32| now.hour() == hour && now.minute() < RUN_WINDOW_MINUTES;
        let not_today = || last_run.map(|t| t.date_naive() != now.date_naive()).unwrap_or(true);
        match self {
            Self::ArchiveLogs => in_window(2) && not_today(),
            Self::DailyStats => in_window(3) && not_today(),
            Self::PurgeArchive => now.day() == 1 && in_window(4) && not_today(),
            Self::SettlementSweep | Self::AdjustmentSweep => last_run
                .map(|t| now.signed_duration_since(t).to_std().map(|d| d >= SWEEP_INTERVAL).unwrap_or(false))
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub handled: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Maintenance {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    settlements: SettlementApi,
    policy: Arc<dyn AdjustmentPolicy>,
}

impl Debug for Maintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maintenance({} adjustments)", self.policy.name())
    }
}

impl Maintenance {
    pub fn new(
        db: SqliteDatabase,
        kv: Arc<dyn KvStore>,
        settlements: SettlementApi,
        policy: Arc<dyn AdjustmentPolicy>,
    ) -> Self {
        Self { db, kv, settlements, policy }
    }

    /// Runs `job` if this node wins its lease. Returns false when a peer holds it.
    pub async fn run_job(&self, job: MaintenanceJob, now: DateTime<Utc>) -> Result<bool, MaintenanceError> {
        let Some(_lease) =
            LeaseLock::try_acquire(Arc::clone(&self.kv), maintenance_lock(job.name()), MAINTENANCE_LOCK_TTL).await?
        else {
            debug!("🧹️ {} is running on another node", job.name());
            return Ok(false);
        };
        match job {
            MaintenanceJob::ArchiveLogs => {
                self.archive_logs().await?;
            },
            MaintenanceJob::DailyStats => {
                self.daily_stats(previous_day(now)).await?;
            },
            MaintenanceJob::PurgeArchive => {
                self.purge_archive().await?;
            },
            MaintenanceJob::SettlementSweep => {
                self.settlement_sweep().await?;
            },
            MaintenanceJob::AdjustmentSweep => {
                self.adjustment_sweep().await?;
            },
        }
        Ok(true)
    }

    /// Moves operation logs older than 90 days to the archive shards, a batch at a time.
    pub async fn archive_logs(&self) -> Result<u64, MaintenanceError> {
        let mut total = 0;
        for shard in all_shards() {
            loop {
                let moved = {
                    let mut tx = self.db.pool().begin().await?;
                    let moved = operation_logs::archive_batch(shard, ARCHIVE_AFTER_DAYS, ARCHIVE_BATCH, &mut tx).await?;
                    tx.commit().await?;
                    moved
                };
                total += moved;
                if moved < ARCHIVE_BATCH as u64 {
                    break;
                }
                tokio::time::sleep(ARCHIVE_YIELD).await;
            }
        }
        info!("🧹️ Archived {total} operation logs");
        Ok(total)
    }

    pub async fn purge_archive(&self) -> Result<u64, MaintenanceError> {
        let mut total = 0;
        let mut conn = self.db.pool().acquire().await?;
        for shard in all_shards() {
            total += operation_logs::purge_archive(shard, PURGE_AFTER_DAYS, &mut conn).await?;
        }
        info!("🧹️ Purged {total} archived operation logs");
        Ok(total)
    }

    /// Rolls up the order and finance statistics of every shop for `date` and the platform total.
    pub async fn daily_stats(&self, date: NaiveDate) -> Result<PlatformDailyStat, MaintenanceError> {
        let date = date.format("%Y-%m-%d").to_string();
        let mut conn = self.db.pool().acquire().await?;
        let mut platform = PlatformDailyStat {
            stat_date: date.clone(),
            order_count: 0,
            total_amount: Money::ZERO,
            escrow_income: Money::ZERO,
            settled_profit: Money::ZERO,
            platform_share: Money::ZERO,
            operator_share: Money::ZERO,
            shop_owner_share: Money::ZERO,
            active_shops: 0,
        };
        for shop in shops::fetch_all_shops(&mut conn).await? {
            let order_stat = stats::compute_order_stat(shop.shop_id, &date, &mut conn).await?;
            let finance_stat = stats::compute_finance_stat(shop.shop_id, &date, &mut conn).await?;
            stats::upsert_order_stat(&order_stat, &mut conn).await?;
            stats::upsert_finance_stat(&finance_stat, &mut conn).await?;
            if order_stat.order_count > 0 {
                platform.active_shops += 1;
            }
            platform.order_count += order_stat.order_count;
            platform.total_amount += order_stat.total_amount;
            platform.escrow_income += finance_stat.escrow_income;
            platform.settled_profit += finance_stat.settled_profit;
            platform.platform_share += finance_stat.platform_share;
            platform.operator_share += finance_stat.operator_share;
            platform.shop_owner_share += finance_stat.shop_owner_share;
        }
        stats::upsert_platform_stat(&platform, &mut conn).await?;
        info!("🧹️ Daily stats for {date}: {} orders across {} active shops", platform.order_count, platform.active_shops);
        Ok(platform)
    }

    /// Fills in the last 30 days of statistics when the platform table is empty, i.e. on a fresh deployment.
    pub async fn backfill_stats(&self, today: NaiveDate) -> Result<usize, MaintenanceError> {
        let count = {
            let mut conn = self.db.pool().acquire().await?;
            stats::count_platform_stats(&mut conn).await?
        };
        if count > 0 {
            return Ok(0);
        }
        let Some(_lease) =
            LeaseLock::try_acquire(Arc::clone(&self.kv), maintenance_lock("stats_backfill"), MAINTENANCE_LOCK_TTL)
                .await?
        else {
            return Ok(0);
        };
        let mut days = 0;
        for back in 1..=STATS_BACKFILL_DAYS {
            if let Some(date) = today.checked_sub_days(Days::new(back)) {
                self.daily_stats(date).await?;
                days += 1;
            }
        }
        info!("🧹️ Backfilled {days} days of statistics");
        Ok(days)
    }

    /// Settles every shipped order whose escrow payout has arrived, and marks the payout row handled.
    pub async fn settlement_sweep(&self) -> Result<SweepReport, MaintenanceError> {
        let mut report = SweepReport::default();
        for shard in all_shards() {
            let records = {
                let mut conn = self.db.pool().acquire().await?;
                shipments::fetch_unsettled(shard, &mut conn).await?
            };
            for record in records {
                let income = {
                    let mut conn = self.db.pool().acquire().await?;
                    finance::fetch_pending_for_order(record.shop_id, &record.order_sn, ESCROW_VERIFIED_ADD, &mut conn)
                        .await?
                };
                let Some(income) = income else { continue };
                report.examined += 1;
                match self.settlements.settle_order(record.shop_id, &record.order_sn, income.amount).await {
                    Ok(_) | Err(SettlementError::AlreadySettled(_)) => {
                        let mut conn = self.db.pool().acquire().await?;
                        finance::mark_handled(income.shop_id, income.id, &mut conn).await?;
                        report.handled += 1;
                    },
                    Err(e) => {
                        warn!("🧹️ Could not settle {} of shop {}: {e}", record.order_sn, record.shop_id);
                        report.failed += 1;
                    },
                }
            }
        }
        if report.examined > 0 {
            info!("🧹️ Settlement sweep: {report:?}");
        }
        Ok(report)
    }

    /// Hands each pending adjustment of a completed settlement to the adjustment policy. Adjustments for orders that
    /// are not settled yet stay pending until they are.
    pub async fn adjustment_sweep(&self) -> Result<SweepReport, MaintenanceError> {
        let mut report = SweepReport::default();
        for shard in all_shards() {
            let incomes = {
                let mut conn = self.db.pool().acquire().await?;
                finance::fetch_pending_of_type(shard, ESCROW_ADJUSTMENT, ADJUSTMENT_BATCH, &mut conn).await?
            };
            for income in incomes {
                let mut tx = self.db.pool().begin().await?;
                // The claim must be the first write of the transaction.
                if !finance::mark_handled(income.shop_id, income.id, &mut tx).await? {
                    tx.rollback().await?;
                    trace!("🧹️ Adjustment {} was claimed by another sweep", income.transaction_id);
                    continue;
                }
                let settlement = settlements::fetch_settlement(income.shop_id, &income.order_sn, &mut tx).await?;
                let Some(settlement) = settlement.filter(|s| s.status == SettlementStatus::Completed) else {
                    tx.rollback().await?;
                    trace!("🧹️ Adjustment {} waits for {} to be settled", income.transaction_id, income.order_sn);
                    continue;
                };
                report.examined += 1;
                let outcome = match self.policy.apply(&income, &settlement, &mut tx).await {
                    Err(SettlementError::TooManyAdjustments(sn)) => {
                        warn!("🧹️ {sn} has reached its adjustment limit. Sending it for review");
                        ManualReview.apply(&income, &settlement, &mut tx).await
                    },
                    other => other,
                };
                match outcome {
                    Ok(outcome) => {
                        tx.commit().await?;
                        report.handled += 1;
                        if let AdjustmentOutcome::Applied { .. } = outcome {
                            debug!("🧹️ Adjustment {} applied to {}", income.transaction_id, income.order_sn);
                        }
                    },
                    Err(e) => {
                        tx.rollback().await?;
                        warn!("🧹️ Adjustment {} on {} failed: {e}", income.transaction_id, income.order_sn);
                        report.failed += 1;
                    },
                }
            }
        }
        if report.examined > 0 {
            info!("🧹️ Adjustment sweep ({}): {report:?}", self.policy.name());
        }
        Ok(report)
    }

    pub fn start(self, shutdown: Shutdown) -> JoinHandle<()> {
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            info!("🧹️ Maintenance scheduler started");
            if let Err(e) = self.backfill_stats(Utc::now().date_naive()).await {
                error!("🧹️ Statistics backfill failed: {e}");
            }
            let mut last_runs = HashMap::<MaintenanceJob, DateTime<Utc>>::new();
            loop {
                let now = Utc::now();
                for job in MaintenanceJob::ALL {
                    if shutdown.is_stopped() {
                        break;
                    }
                    if !job.is_due(now, last_runs.get(&job).copied()) {
                        continue;
                    }
                    last_runs.insert(job, now);
                    if let Err(e) = self.run_job(job, now).await {
                        error!("🧹️ {} failed: {e}", job.name());
                    }
                }
                if !shutdown.sleep(TICK).await {
                    break;
                }
            }
            info!("🧹️ Maintenance scheduler stopped");
        })
    }
}

fn previous_day(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.pred_opt().unwrap_or(today)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn daily_jobs_run_once_in_their_window() {
        let job = MaintenanceJob::ArchiveLogs;
        assert!(job.is_due(at(5, 2, 0), None));
        assert!(job.is_due(at(5, 2, 4), Some(at(4, 2, 0))));
        assert!(!job.is_due(at(5, 2, 3), Some(at(5, 2, 0))));
        assert!(!job.is_due(at(5, 2, 5), None));
        assert!(!job.is_due(at(5, 3, 0), None));
        assert!(MaintenanceJob::DailyStats.is_due(at(5, 3, 1), None));
    }

    #[test]
    fn purge_runs_on_the_first() {
        let job = MaintenanceJob::PurgeArchive;
        assert!(job.is_due(at(1, 4, 0), None));
        assert!(!job.is_due(at(2, 4, 0), None));
    }

    #[test]
    fn sweeps_every_ten_minutes() {
        let job = MaintenanceJob::SettlementSweep;
        assert!(job.is_due(at(5, 12, 0), None));
        assert!(!job.is_due(at(5, 12, 9), Some(at(5, 12, 0))));
        assert!(job.is_due(at(5, 12, 10), Some(at(5, 12, 0))));
    }

    #[test]
    fn stats_cover_yesterday() {
        assert_eq!(previous_day(at(1, 3, 0)), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }
}
