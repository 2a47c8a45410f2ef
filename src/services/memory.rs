//! In-process backends for tests and local runs without Redis or S3.
//!
//! Each one honors the same contract as its networked counterpart and can be
//! switched to a failing mode to exercise error paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::services::cache::{CacheError, Cacher};
use crate::services::fetch::{check_image_bytes, FetchError, SourceFetcher};
use crate::services::queue::{Broker, Delivery, QueueError, QueueStats};
use crate::services::storage::{storage_key, StorageError, Uploader};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct BrokerState {
    ready: VecDeque<(String, bool)>,
    in_flight: HashMap<String, Vec<String>>,
    dead: Vec<String>,
    leases: HashMap<String, tokio::time::Instant>,
}

/// Broker with the same park/ack/recover semantics as [`RedisBroker`].
///
/// [`RedisBroker`]: crate::services::queue::RedisBroker
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    available: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("memory broker is down".to_string()))
        }
    }

    /// Messages waiting to be received.
    pub fn pending(&self) -> usize {
        locked(&self.state).ready.len()
    }

    /// Messages received but not yet acked or rejected.
    pub fn in_flight(&self) -> usize {
        locked(&self.state).in_flight.values().map(Vec::len).sum()
    }

    pub fn dead_letters(&self) -> Vec<String> {
        locked(&self.state).dead.clone()
    }

    fn try_take(&self, consumer: &str) -> Option<Delivery> {
        let mut state = locked(&self.state);
        let (payload, redelivered) = state.ready.pop_front()?;
        state
            .in_flight
            .entry(consumer.to_string())
            .or_default()
            .push(payload.clone());
        Some(Delivery {
            consumer: consumer.to_string(),
            payload,
            redelivered,
        })
    }

    fn remove_in_flight(&self, delivery: &Delivery) -> bool {
        let mut state = locked(&self.state);
        let Some(parked) = state.in_flight.get_mut(&delivery.consumer) else {
            return false;
        };
        match parked.iter().position(|p| *p == delivery.payload) {
            Some(index) => {
                parked.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, payload: String) -> Result<(), QueueError> {
        self.ensure_available()?;
        locked(&self.state).ready.push_back((payload, false));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, consumer: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.ensure_available()?;

            // Register interest before checking so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(consumer) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.remove_in_flight(delivery);
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_available()?;
        if self.remove_in_flight(delivery) {
            locked(&self.state).dead.push(delivery.payload.clone());
        }
        Ok(())
    }

    async fn recover(&self, consumer: &str) -> Result<u64, QueueError> {
        self.ensure_available()?;
        let moved = {
            let mut state = locked(&self.state);
            let parked = state.in_flight.remove(consumer).unwrap_or_default();
            let moved = parked.len() as u64;
            for payload in parked.into_iter().rev() {
                state.ready.push_front((payload, true));
            }
            moved
        };
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn heartbeat(&self, consumers: &[String], lease: Duration) -> Result<(), QueueError> {
        self.ensure_available()?;
        let expires = tokio::time::Instant::now() + lease;
        let mut state = locked(&self.state);
        for consumer in consumers {
            state.leases.insert(consumer.clone(), expires);
        }
        Ok(())
    }

    async fn orphaned(&self) -> Result<Vec<String>, QueueError> {
        self.ensure_available()?;
        let now = tokio::time::Instant::now();
        let mut state = locked(&self.state);
        state.leases.retain(|_, expires| *expires > now);
        let mut orphaned: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(consumer, parked)| !parked.is_empty() && !state.leases.contains_key(*consumer))
            .map(|(consumer, _)| consumer.clone())
            .collect();
        orphaned.sort();
        Ok(orphaned)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.ensure_available()?;
        let state = locked(&self.state);
        Ok(QueueStats {
            pending: state.ready.len() as u64,
            dead_letters: state.dead.len() as u64,
        })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ensure_available()
    }
}

/// TTL-honoring key/value cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`CacheError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("memory cache is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cacher for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_available()?;
        let mut entries = locked(&self.entries);
        let expired = matches!(entries.get(key), Some((_, expires)) if *expires <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.ensure_available()?;
        locked(&self.entries).insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self, prefix: &str) -> Result<u64, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let entries = locked(&self.entries);
        Ok(entries
            .iter()
            .filter(|(key, (_, expires))| key.starts_with(prefix) && *expires > now)
            .count() as u64)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.ensure_available()
    }
}

/// Object store keyed like the S3 gateway, with `memory://` URLs.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub const URL_PREFIX: &'static str = "memory://bucket/";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Store an object under an exact key, as a pre-existing source would be.
    pub fn insert(&self, key: &str, data: Vec<u8>, content_type: &str) {
        locked(&self.objects).insert(key.to_string(), (data, content_type.to_string()));
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = locked(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        locked(&self.objects).get(key).cloned()
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Uploader for MemoryStorage {
    async fn upload(&self, data: &[u8], filename: &str, content_type: &str) -> Result<String, StorageError> {
        self.ensure_available()?;
        let key = storage_key(filename);
        self.insert(&key, data.to_vec(), content_type);
        Ok(format!("{}{key}", Self::URL_PREFIX))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_available()?;
        let key = path.strip_prefix(Self::URL_PREFIX).unwrap_or(path);
        self.object(key).map(|(data, _)| data).ok_or(StorageError::Status {
            key: key.to_string(),
            status: 404,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        let key = path.strip_prefix(Self::URL_PREFIX).unwrap_or(path);
        locked(&self.objects).remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.ensure_available()
    }
}

/// Source fetcher serving registered byte blobs by reference.
#[derive(Default)]
pub struct MemorySources {
    sources: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source: &str, data: Vec<u8>) {
        locked(&self.sources).insert(source.to_string(), data);
    }

    /// Number of fetch calls so far, successful or not.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make every fetch take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *locked(&self.delay) = Some(delay);
    }
}

#[async_trait]
impl SourceFetcher for MemorySources {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *locked(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = locked(&self.sources)
            .get(source)
            .cloned()
            .ok_or(FetchError::Status(404))?;
        check_image_bytes(&bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recover_returns_parked_messages_in_order() {
        let broker = MemoryBroker::new();
        for payload in ["a", "b", "c"] {
            broker.publish(payload.to_string()).await.unwrap();
        }
        let timeout = Duration::from_millis(10);
        let first = broker.receive("w", timeout).await.unwrap().unwrap();
        let second = broker.receive("w", timeout).await.unwrap().unwrap();
        assert_eq!((first.payload.as_str(), second.payload.as_str()), ("a", "b"));
        assert!(!first.redelivered);

        assert_eq!(broker.recover("w").await.unwrap(), 2);
        let again = broker.receive("other", timeout).await.unwrap().unwrap();
        assert_eq!(again.payload, "a");
        assert!(again.redelivered);
        assert_eq!(broker.pending(), 2);
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let broker = std::sync::Arc::new(MemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive("w", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("late".to_string()).await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, "late");
    }

    #[tokio::test]
    async fn reject_moves_to_dead_letters() {
        let broker = MemoryBroker::new();
        broker.publish("bad".to_string()).await.unwrap();
        let delivery = broker.receive("w", Duration::from_millis(10)).await.unwrap().unwrap();
        broker.reject(&delivery).await.unwrap();

        assert_eq!(broker.dead_letters(), vec!["bad".to_string()]);
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.recover("w").await.unwrap(), 0);
        assert_eq!(broker.stats().await.unwrap().dead_letters, 1);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.count("").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn count_only_sees_live_prefixed_keys() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("img_cache:a", b"1", ttl).await.unwrap();
        cache.set("img_cache:b", b"2", ttl).await.unwrap();
        cache.set("other", b"3", ttl).await.unwrap();
        assert_eq!(cache.count("img_cache:").await.unwrap(), 2);
    }
}
