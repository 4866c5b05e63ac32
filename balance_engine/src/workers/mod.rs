//! Background work: the order sync scheduler (with its patrol), the finance-income sync and the maintenance jobs.
//!
//! Every worker is started with a [`Shutdown`] receiver and exits at its next suspension point once the matching
//! [`ShutdownHandle`] fires. Work already committed is kept; a patrol that is cut short resumes from the shop's
//! watermark on the next run.
pub mod adjustment;
pub mod finance_sync;
pub mod maintenance;
pub mod patrol;
pub mod sync_scheduler;

use std::{future::Future, sync::Arc, time::Duration};

use log::*;
use tokio::sync::{watch, Semaphore};

use crate::kv::{KvError, KvStore};

const REQUEUE_BACKOFF: Duration = Duration::from_secs(1);

/// Fires the shutdown of every worker that holds a [`Shutdown`] made from it.
#[derive(Debug)]
pub struct ShutdownHandle {
    cancel: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, Shutdown) {
        let (cancel, rx) = watch::channel(false);
        (Self { cancel }, Shutdown { rx })
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.cancel.subscribe() }
    }

    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested, or the handle has been dropped.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `period`. Returns false if shutdown was requested first.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => true,
            _ = self.stopped() => false,
        }
    }
}

/// Sizing and cadence of the background workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub sync_workers: usize,
    pub finance_workers: usize,
    pub sync_interval: Duration,
    pub finance_interval: Duration,
    pub patrol_timeout: Duration,
    pub returns_timeout: Duration,
    /// How long the dispatcher blocks on an empty queue before checking for shutdown.
    pub queue_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sync_workers: 16,
            finance_workers: 10,
            sync_interval: Duration::from_secs(30 * 60),
            finance_interval: Duration::from_secs(60 * 60),
            patrol_timeout: Duration::from_secs(8 * 60),
            returns_timeout: Duration::from_secs(3 * 60),
            queue_poll: Duration::from_secs(30),
        }
    }
}

/// Pops one shop id off `queue` and runs `work` for it on a spawned task holding one of `permits`. When every permit
/// is taken the id goes back on the queue. Returns false when the queue stayed empty for `poll`.
pub(crate) async fn dispatch_from_queue<F, Fut>(
    kv: &Arc<dyn KvStore>,
    queue: &str,
    poll: Duration,
    permits: &Arc<Semaphore>,
    work: F,
) -> Result<bool, KvError>
where
    F: FnOnce(i64) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(item) = kv.brpop(queue, poll).await? else {
        return Ok(false);
    };
    let Ok(shop_id) = item.parse::<i64>() else {
        warn!("🕰️ Dropping malformed entry {item} from {queue}");
        return Ok(true);
    };
    match Arc::clone(permits).try_acquire_owned() {
        Ok(permit) => {
            let job = work(shop_id);
            tokio::spawn(async move {
                job.await;
                drop(permit);
            });
        },
        Err(_) => {
            trace!("🕰️ All workers of {queue} are busy. Putting shop {shop_id} back");
            kv.lpush(queue, &item).await?;
            tokio::time::sleep(REQUEUE_BACKOFF).await;
        },
    }
    Ok(true)
}
