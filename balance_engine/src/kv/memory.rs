use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Notify, time::Instant};

use super::{KvError, KvStore};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| t > now)
    }
}

/// In-process [`KvStore`]. Clones share the same data, so every component of a node sees the same locks and queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    pushed: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the guard leaves the map in a consistent state, so poisoning is ignored.
        self.data.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Returns the live entry for `key`, evicting it first if it has expired.
    fn live_entry<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if map.get(key).is_some_and(|e| !e.live(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }

    fn push(&self, key: &str, value: &str, front: bool) -> Result<(), KvError> {
        {
            let mut map = self.data();
            Self::live_entry(&mut map, key);
            let entry = map
                .entry(key.to_string())
                .or_insert(Entry { value: Value::List(VecDeque::new()), expires_at: None });
            match &mut entry.value {
                Value::List(list) if front => list.push_front(value.to_string()),
                Value::List(list) => list.push_back(value.to_string()),
                _ => return Err(KvError::WrongType(key.to_string())),
            }
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    fn pop_back(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.data();
        let (value, drained) = match Self::live_entry(&mut map, key).map(|e| &mut e.value) {
            None => return Ok(None),
            Some(Value::List(list)) => (list.pop_back(), list.is_empty()),
            Some(_) => return Err(KvError::WrongType(key.to_string())),
        };
        if drained {
            map.remove(key);
        }
        Ok(value)
    }

    fn with_set<F, R>(&self, key: &str, create: bool, f: F) -> Result<Option<R>, KvError>
    where F: FnOnce(&mut BTreeSet<String>) -> R {
        let mut map = self.data();
        if Self::live_entry(&mut map, key).is_none() {
            if !create {
                return Ok(None);
            }
            map.insert(key.to_string(), Entry { value: Value::Set(BTreeSet::new()), expires_at: None });
        }
        match map.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(set)) => Ok(Some(f(set))),
            _ => Err(KvError::WrongType(key.to_string())),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.data();
        if Self::live_entry(&mut map, key).is_some() {
            return Ok(false);
        }
        let entry = Entry { value: Value::Str(value.to_string()), expires_at: Some(Instant::now() + ttl) };
        map.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.data();
        match Self::live_entry(&mut map, key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let entry = Entry { value: Value::Str(value.to_string()), expires_at: Some(Instant::now() + ttl) };
        self.data().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.data().remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut map = self.data();
        let current = Self::live_entry(&mut map, key).map(|e| &e.value);
        let matched = matches!(current, Some(Value::Str(s)) if s == expected);
        if matched {
            map.remove(key);
        }
        Ok(matched)
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.data();
        match Self::live_entry(&mut map, key) {
            Some(e) if matches!(&e.value, Value::Str(s) if s == expected) => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.push(key, value, true)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.push(key, value, false)
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, KvError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check and the wait is not missed.
            let notified = self.pushed.notified();
            if let Some(v) = self.pop_back(key)? {
                return Ok(Some(v));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop_back(key);
            }
        }
    }

    async fn llen(&self, key: &str) -> Result<usize, KvError> {
        let mut map = self.data();
        match Self::live_entry(&mut map, key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.with_set(key, true, |set| set.insert(member.to_string()))?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.with_set(key, false, |set| set.remove(member))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let members = self.with_set(key, false, |set| set.iter().cloned().collect::<Vec<_>>())?;
        Ok(members.unwrap_or_default())
    }

    async fn check_and_set_greater(&self, key: &str, value: i64, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.data();
        let current = match Self::live_entry(&mut map, key).map(|e| &e.value) {
            None => None,
            Some(Value::Str(s)) => s.parse::<i64>().ok(),
            Some(_) => return Err(KvError::WrongType(key.to_string())),
        };
        if current.is_some_and(|c| value <= c) {
            return Ok(false);
        }
        let entry = Entry { value: Value::Str(value.to_string()), expires_at: Some(Instant::now() + ttl) };
        map.insert(key.to_string(), entry);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_nx_respects_ttl() {
        let kv = MemoryStore::new();
        assert!(kv.set_nx_ex("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!kv.set_nx_ex("k", "b", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.set_nx_ex("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn compare_ops_only_touch_matching_values() {
        let kv = MemoryStore::new();
        kv.set_ex("lock", "me", Duration::from_secs(5)).await.unwrap();
        assert!(!kv.compare_and_delete("lock", "you").await.unwrap());
        assert!(!kv.compare_and_expire("lock", "you", Duration::from_secs(50)).await.unwrap());
        assert!(kv.compare_and_expire("lock", "me", Duration::from_secs(50)).await.unwrap());
        assert!(kv.compare_and_delete("lock", "me").await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_pop_in_push_order() {
        let kv = MemoryStore::new();
        kv.lpush("q", "1").await.unwrap();
        kv.lpush("q", "2").await.unwrap();
        kv.rpush("q", "0").await.unwrap();
        assert_eq!(kv.llen("q").await.unwrap(), 3);
        assert_eq!(kv.brpop("q", Duration::from_millis(10)).await.unwrap().as_deref(), Some("0"));
        assert_eq!(kv.brpop("q", Duration::from_millis(10)).await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.brpop("q", Duration::from_millis(10)).await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.brpop("q", Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn brpop_wakes_on_push() {
        let kv = MemoryStore::new();
        let kv2 = kv.clone();
        let waiter = tokio::spawn(async move { kv2.brpop("q", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        kv.lpush("q", "shop").await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().as_deref(), Some("shop"));
    }

    #[tokio::test]
    async fn sets() {
        let kv = MemoryStore::new();
        kv.sadd("s", "b").await.unwrap();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "a").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["a", "b"]);
        kv.srem("s", "a").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["b"]);
        assert!(kv.get("s").await.is_err());
    }

    #[tokio::test]
    async fn check_and_set_greater_is_monotone() {
        let kv = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(kv.check_and_set_greater("t", 100, ttl).await.unwrap());
        assert!(!kv.check_and_set_greater("t", 100, ttl).await.unwrap());
        assert!(!kv.check_and_set_greater("t", 99, ttl).await.unwrap());
        assert!(kv.check_and_set_greater("t", 101, ttl).await.unwrap());
        assert_eq!(kv.get("t").await.unwrap().as_deref(), Some("101"));
    }
}
