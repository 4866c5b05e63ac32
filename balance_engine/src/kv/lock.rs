//! A Redlock-style lease over a single [`KvStore`] key.
//!
//! The lease only avoids contention. It can be lost if a worker overruns its TTL, so every critical section it
//! guards must also serialise on a database row.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use rand::Rng;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};

use super::{KvError, KvStore};

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Store(#[from] KvError),
}

pub struct LeaseLock {
    kv: Arc<dyn KvStore>,
    key: String,
    token: String,
    ttl: Duration,
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LeaseLock({}, ttl {:?})", self.key, self.ttl)
    }
}

impl LeaseLock {
    /// Makes a single attempt to take the lease. `None` means somebody else holds it.
    pub async fn try_acquire(
        kv: Arc<dyn KvStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> Result<Option<Self>, LockError> {
        let key = key.into();
        let token = format!("{:016x}", rand::random::<u64>());
        if kv.set_nx_ex(&key, &token, ttl).await? {
            trace!("🔐️ Acquired {key}");
            Ok(Some(Self { kv, key, token, ttl }))
        } else {
            trace!("🔐️ {key} is held elsewhere");
            Ok(None)
        }
    }

    /// Tries up to `tries` times, sleeping a random interval of up to `jitter` between attempts.
    pub async fn acquire_with_retry(
        kv: Arc<dyn KvStore>,
        key: impl Into<String>,
        ttl: Duration,
        tries: u32,
        jitter: Duration,
    ) -> Result<Option<Self>, LockError> {
        let key = key.into();
        for attempt in 0..tries.max(1) {
            if attempt > 0 {
                let max = jitter.as_millis().max(1) as u64;
                let wait = rand::thread_rng().gen_range(max / 2..=max);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            if let Some(lock) = Self::try_acquire(Arc::clone(&kv), key.clone(), ttl).await? {
                return Ok(Some(lock));
            }
        }
        Ok(None)
    }

    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Pushes the expiry out by another TTL. Returns false if the lease has already been lost.
    pub async fn extend(&self) -> Result<bool, LockError> {
        Ok(self.kv.compare_and_expire(&self.key, &self.token, self.ttl).await?)
    }

    /// Renews the lease every TTL/3 until the returned extender is stopped or dropped.
    pub fn start_extender(&self) -> LeaseExtender {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let lost = Arc::new(AtomicBool::new(false));
        let kv = Arc::clone(&self.kv);
        let key = self.key.clone();
        let token = self.token.clone();
        let ttl = self.ttl;
        let flag = Arc::clone(&lost);
        let handle = tokio::spawn(async move {
            let period = (ttl / 3).max(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(period) => {
                        match kv.compare_and_expire(&key, &token, ttl).await {
                            Ok(true) => trace!("🔐️ Extended {key}"),
                            Ok(false) => {
                                warn!("🔐️ Lease {key} was lost before the work finished");
                                flag.store(true, Ordering::SeqCst);
                                break;
                            },
                            Err(e) => warn!("🔐️ Could not extend {key}: {e}"),
                        }
                    }
                }
            }
        });
        LeaseExtender { stop: Some(stop), handle: Some(handle), lost }
    }

    /// Releases the lease if we still hold it. Returns false if it had already expired or been taken over.
    pub async fn release(self) -> Result<bool, LockError> {
        let released = self.kv.compare_and_delete(&self.key, &self.token).await?;
        if released {
            trace!("🔐️ Released {}", self.key);
        } else {
            debug!("🔐️ {} had already expired when released", self.key);
        }
        Ok(released)
    }
}

pub struct LeaseExtender {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
}

impl LeaseExtender {
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LeaseExtender {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn only_one_holder() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(10);
        let first = LeaseLock::try_acquire(Arc::clone(&kv), "sync:lock:1", ttl).await.unwrap().unwrap();
        assert!(LeaseLock::try_acquire(Arc::clone(&kv), "sync:lock:1", ttl).await.unwrap().is_none());
        assert!(LeaseLock::try_acquire(Arc::clone(&kv), "sync:lock:2", ttl).await.unwrap().is_some());
        assert!(first.release().await.unwrap());
        assert!(LeaseLock::try_acquire(kv, "sync:lock:1", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn extender_keeps_the_lease_alive() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(3);
        let lock = LeaseLock::try_acquire(Arc::clone(&kv), "k", ttl).await.unwrap().unwrap();
        let extender = lock.start_extender();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(LeaseLock::try_acquire(Arc::clone(&kv), "k", ttl).await.unwrap().is_none());
        assert!(!extender.is_lost());
        extender.stop().await;
        assert!(lock.release().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_not_released_by_old_holder() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(1);
        let old = LeaseLock::try_acquire(Arc::clone(&kv), "k", ttl).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let new = LeaseLock::try_acquire(Arc::clone(&kv), "k", ttl).await.unwrap().unwrap();
        assert!(!old.release().await.unwrap());
        assert!(new.extend().await.unwrap());
    }
}
