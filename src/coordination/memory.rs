//! In-memory coordination store
//!
//! Process-local locks and broadcast topics. Share one instance through an
//! `Arc` to simulate several ledger instances in a single process.
//! [`InMemoryCoordination::set_available`] simulates an outage.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::warn;

use super::{CoordinationError, CoordinationStore, PayloadStream};

const TOPIC_CAPACITY: usize = 1024;

struct LockEntry {
    token: String,
    expires_at: Instant,
}

pub struct InMemoryCoordination {
    locks: DashMap<String, LockEntry>,
    topics: DashMap<String, broadcast::Sender<String>>,
    available: AtomicBool,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            topics: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated reachability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live (unexpired) locks
    pub fn held_locks(&self) -> usize {
        let now = Instant::now();
        self.locks.iter().filter(|e| e.expires_at > now).count()
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordinationError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordination {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn try_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        self.check_available()?;
        let now = Instant::now();
        let fresh = LockEntry {
            token: token.to_string(),
            expires_at: now + ttl,
        };
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, CoordinationError> {
        self.check_available()?;
        Ok(self
            .locks
            .remove_if(key, |_, held| held.token == token)
            .is_some())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CoordinationError> {
        self.check_available()?;
        // No subscribers is not an error
        let _ = self.sender(topic).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, CoordinationError> {
        self.check_available()?;
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = futures::stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, topic))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_exclusive_until_expiry() {
        let store = InMemoryCoordination::new();
        let ttl = Duration::from_millis(50);

        assert!(store.try_lock("k", "a", ttl).await.unwrap());
        assert!(!store.try_lock("k", "b", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.try_lock("k", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_requires_owner_token() {
        let store = InMemoryCoordination::new();
        let ttl = Duration::from_secs(5);
        store.try_lock("k", "owner", ttl).await.unwrap();

        assert!(!store.unlock("k", "intruder").await.unwrap());
        assert_eq!(store.held_locks(), 1);
        assert!(store.unlock("k", "owner").await.unwrap());
        assert_eq!(store.held_locks(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = InMemoryCoordination::new();
        store.set_available(false);
        assert!(matches!(
            store.try_lock("k", "t", Duration::from_secs(1)).await,
            Err(CoordinationError::Unavailable(_))
        ));
        assert!(store.publish("t", "x").await.is_err());
        assert!(store.subscribe("t").await.is_err());
    }

    #[tokio::test]
    async fn test_pubsub_delivers_to_all_subscribers() {
        let store = InMemoryCoordination::new();
        let mut s1 = store.subscribe("topic").await.unwrap();
        let mut s2 = store.subscribe("topic").await.unwrap();
        let mut other = store.subscribe("other").await.unwrap();

        store.publish("topic", "hello").await.unwrap();
        assert_eq!(s1.next().await.unwrap(), "hello");
        assert_eq!(s2.next().await.unwrap(), "hello");

        let nothing = tokio::time::timeout(Duration::from_millis(30), other.next()).await;
        assert!(nothing.is_err());
    }
}
