//! Cross-instance balance notifications
//!
//! After every committed mutation the pipeline publishes a
//! [`BalanceChange`] on the cluster's balance topic. Every instance
//! listens on the same topic; a message from another instance drops the
//! local cache entry for that account and pings the holder's session if
//! one is connected here. Messages carrying the local instance id are
//! ignored.
//!
//! Publishing is best-effort and never part of the commit: a failed
//! publish is logged and counted, the transaction still succeeds.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::account::AccountStore;
use crate::coordination::{CoordinationError, CoordinationStore, PayloadStream};
use crate::core_types::{AccountId, ClusterId, InstanceId, ScaledAmount, TimestampMs, now_ms};
use crate::external::SessionGateway;
use crate::money;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Wire message on `<cluster>.balance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub account_id: AccountId,
    pub new_balance: ScaledAmount,
    pub origin: InstanceId,
    pub at_ms: TimestampMs,
}

pub struct CrossInstanceNotifier {
    coordination: Arc<dyn CoordinationStore>,
    store: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionGateway>,
    instance: InstanceId,
    topic: String,
    published: AtomicU64,
    publish_failures: AtomicU64,
    applied: AtomicU64,
}

impl CrossInstanceNotifier {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        store: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionGateway>,
        instance: InstanceId,
        cluster: &ClusterId,
    ) -> Self {
        Self {
            coordination,
            store,
            sessions,
            instance,
            topic: cluster.balance_topic(),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Remote changes applied locally
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Fire-and-forget; never fails the caller
    pub async fn publish_balance_change(&self, account: &AccountId, new_balance: ScaledAmount) {
        let change = BalanceChange {
            account_id: *account,
            new_balance,
            origin: self.instance.clone(),
            at_ms: now_ms(),
        };
        let payload = match serde_json::to_string(&change) {
            Ok(p) => p,
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(account_id = %account, error = %e, "Failed to encode balance change");
                return;
            }
        };
        match self.coordination.publish(&self.topic, &payload).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                trace!(account_id = %account, new_balance, "Balance change published");
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    account_id = %account,
                    topic = %self.topic,
                    error = %e,
                    "Failed to publish balance change; other instances may serve stale reads"
                );
            }
        }
    }

    pub async fn subscribe(&self) -> Result<PayloadStream, CoordinationError> {
        self.coordination.subscribe(&self.topic).await
    }

    /// Apply one received payload. Returns `true` when it came from
    /// another instance and was applied.
    pub fn handle_message(&self, payload: &str) -> bool {
        let change: BalanceChange = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Malformed balance change message");
                return false;
            }
        };
        if change.origin == self.instance {
            return false;
        }

        self.store.invalidate_cache(&change.account_id);
        if self.sessions.is_online(&change.account_id) {
            self.sessions.deliver(
                &change.account_id,
                &format!(
                    "Your balance is now {}",
                    money::format_amount(change.new_balance)
                ),
            );
        }
        self.applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            account_id = %change.account_id,
            origin = %change.origin,
            new_balance = change.new_balance,
            "Remote balance change applied"
        );
        true
    }

    /// Drain a subscription until it ends
    pub async fn consume(&self, mut stream: PayloadStream) {
        while let Some(payload) = stream.next().await {
            self.handle_message(&payload);
        }
    }

    /// Listen forever, resubscribing after outages
    pub async fn run(self: Arc<Self>) {
        info!(topic = %self.topic, instance = %self.instance, "Starting balance change listener");
        loop {
            match self.subscribe().await {
                Ok(stream) => {
                    self.consume(stream).await;
                    warn!(topic = %self.topic, "Balance change subscription ended, resubscribing");
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{CachedAccountStore, SqliteAccountStore};
    use crate::coordination::InMemoryCoordination;
    use crate::external::mock::MockSessions;

    struct Node {
        cache: Arc<CachedAccountStore>,
        sessions: Arc<MockSessions>,
        notifier: Arc<CrossInstanceNotifier>,
    }

    fn node(
        name: &str,
        bus: Arc<InMemoryCoordination>,
        shared: Arc<SqliteAccountStore>,
        cluster: &str,
    ) -> Node {
        let cache = Arc::new(CachedAccountStore::new(shared));
        let sessions = Arc::new(MockSessions::new());
        let notifier = Arc::new(CrossInstanceNotifier::new(
            bus,
            cache.clone(),
            sessions.clone(),
            InstanceId::from(name),
            &ClusterId::new(cluster),
        ));
        Node {
            cache,
            sessions,
            notifier,
        }
    }

    #[tokio::test]
    async fn test_remote_change_invalidates_and_notifies() {
        let bus = Arc::new(InMemoryCoordination::new());
        let shared = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let a = node("a", bus.clone(), shared.clone(), "c1");
        let b = node("b", bus.clone(), shared.clone(), "c1");

        let id = AccountId::new();
        b.cache.get_or_create(&id, "alice").await.unwrap();
        b.sessions.connect(&id);
        assert!(b.cache.is_cached(&id));

        let stream = b.notifier.subscribe().await.unwrap();
        let listener = b.notifier.clone();
        let task = tokio::spawn(async move { listener.consume(stream).await });

        a.notifier.publish_balance_change(&id, 12_345).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while b.notifier.applied() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!b.cache.is_cached(&id));
        assert_eq!(
            b.sessions.delivered(),
            vec![(id, "Your balance is now 123.45".to_string())]
        );
        task.abort();
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let bus = Arc::new(InMemoryCoordination::new());
        let shared = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let a = node("a", bus, shared, "c1");
        let id = AccountId::new();
        a.cache.get_or_create(&id, "alice").await.unwrap();

        let own = serde_json::to_string(&BalanceChange {
            account_id: id,
            new_balance: 1,
            origin: InstanceId::from("a"),
            at_ms: 0,
        })
        .unwrap();
        assert!(!a.notifier.handle_message(&own));
        assert!(a.cache.is_cached(&id));
        assert!(!a.notifier.handle_message("{not json"));
    }

    #[tokio::test]
    async fn test_clusters_do_not_cross_talk() {
        let bus = Arc::new(InMemoryCoordination::new());
        let shared = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let a = node("a", bus.clone(), shared.clone(), "c1");
        let other = node("b", bus, shared, "c2");

        let mut stream = other.notifier.subscribe().await.unwrap();
        a.notifier.publish_balance_change(&AccountId::new(), 5).await;

        let got = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let bus = Arc::new(InMemoryCoordination::new());
        let shared = Arc::new(SqliteAccountStore::in_memory().await.unwrap());
        let a = node("a", bus.clone(), shared, "c1");
        bus.set_available(false);

        a.notifier.publish_balance_change(&AccountId::new(), 5).await;
        assert_eq!(a.notifier.publish_failures(), 1);
        assert_eq!(a.notifier.published(), 0);
    }
}
