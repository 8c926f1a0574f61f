//! Distributed Lock Coordinator
//!
//! Per-account mutual exclusion across instances.
//!
//! # Layers
//!
//! ```text
//! acquire(key) ──▶ local tokio Mutex (per key) ──▶ coordination store try_lock(key, token, ttl)
//!                                                    │ Unavailable
//!                                                    ▼
//!                                          degraded: local lock only
//! ```
//!
//! # Invariants
//!
//! 1. **Ownership token**: every acquisition carries a fresh ULID token and
//!    release is compare-and-delete on that token, so a continuation running
//!    on another worker releases correctly and never frees a successor's lock
//! 2. **Sorted pairs**: two-account operations lock in ascending key order,
//!    so opposite-direction transfers cannot wait on each other in a cycle
//! 3. **Bounded wait**: acquisition gives up at the deadline with
//!    [`LockError::Timeout`] instead of hanging
//! 4. **Visible degradation**: pass-through acquisitions are logged at
//!    `warn` and counted

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::{CoordinationError, CoordinationStore};
use crate::config::CoordinationConfig;
use crate::core_types::{AccountId, ClusterId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock {key} not acquired within {waited_ms} ms")]
    Timeout { key: String, waited_ms: u64 },

    #[error("Coordination store rejected lock request: {0}")]
    Backend(String),
}

/// One held key
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: String,
    /// Held locally only; the coordination store was unreachable
    degraded: bool,
    acquired_at: Instant,
    _local: OwnedMutexGuard<()>,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// All keys held by one pipeline operation, in acquisition order
#[derive(Debug)]
pub struct LockGuard {
    handles: Vec<LockHandle>,
}

impl LockGuard {
    pub fn keys(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.key()).collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.handles.iter().any(|h| h.degraded)
    }
}

pub struct DistributedLockCoordinator {
    store: Arc<dyn CoordinationStore>,
    cluster: ClusterId,
    ttl: Duration,
    retry_interval: Duration,
    default_timeout: Duration,
    local: DashMap<String, Arc<Mutex<()>>>,
    degraded_acquisitions: AtomicU64,
    degraded: AtomicBool,
}

impl DistributedLockCoordinator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        cluster: ClusterId,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            ttl: config.lock_ttl(),
            retry_interval: config.lock_retry().max(Duration::from_millis(1)),
            default_timeout: config.lock_timeout(),
            local: DashMap::new(),
            degraded_acquisitions: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Total acquisitions that fell back to local-only locking
    pub fn degraded_acquisitions(&self) -> u64 {
        self.degraded_acquisitions.load(Ordering::Relaxed)
    }

    /// Whether the most recent acquisition ran degraded
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Lock one account
    pub async fn acquire(
        &self,
        account: &AccountId,
        timeout: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + timeout;
        let handle = self
            .acquire_key(self.cluster.lock_key(account), deadline)
            .await?;
        Ok(LockGuard {
            handles: vec![handle],
        })
    }

    /// Lock two accounts in ascending key order
    pub async fn acquire_pair(
        &self,
        a: &AccountId,
        b: &AccountId,
        timeout: Duration,
    ) -> Result<LockGuard, LockError> {
        if a == b {
            return self.acquire(a, timeout).await;
        }
        let deadline = Instant::now() + timeout;
        let mut keys = [self.cluster.lock_key(a), self.cluster.lock_key(b)];
        keys.sort();
        let [first, second] = keys;

        let first = self.acquire_key(first, deadline).await?;
        match self.acquire_key(second, deadline).await {
            Ok(second) => Ok(LockGuard {
                handles: vec![first, second],
            }),
            Err(e) => {
                self.release(LockGuard {
                    handles: vec![first],
                })
                .await;
                Err(e)
            }
        }
    }

    /// Release every key in reverse acquisition order.
    ///
    /// Never fails: an unreleasable remote lock expires after its TTL.
    pub async fn release(&self, guard: LockGuard) {
        for handle in guard.handles.into_iter().rev() {
            let held = handle.acquired_at.elapsed();
            if held > self.ttl {
                warn!(
                    key = %handle.key,
                    held_ms = held.as_millis() as u64,
                    ttl_ms = self.ttl.as_millis() as u64,
                    "Lock held past its TTL; exclusion may have been lost"
                );
            }

            if !handle.degraded {
                match self.store.unlock(&handle.key, &handle.token).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        key = %handle.key,
                        "Lock no longer owned at release (expired and taken over)"
                    ),
                    Err(e) => warn!(
                        key = %handle.key,
                        error = %e,
                        "Failed to release lock; it will expire after TTL"
                    ),
                }
            }

            let key = handle.key.clone();
            drop(handle);
            // Drop idle local mutexes so the map does not grow with every account
            self.local.remove_if(&key, |_, m| Arc::strong_count(m) == 1);
        }
    }

    async fn acquire_key(&self, key: String, deadline: Instant) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let local = self
            .local
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let remaining = deadline.saturating_duration_since(Instant::now());
        let local_guard = match tokio::time::timeout(remaining, local.lock_owned()).await {
            Ok(g) => g,
            Err(_) => {
                return Err(LockError::Timeout {
                    key,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let token = ulid::Ulid::new().to_string();
        loop {
            match self.store.try_lock(&key, &token, self.ttl).await {
                Ok(true) => {
                    if self.degraded.swap(false, Ordering::Relaxed) {
                        info!(backend = self.store.backend(), "Coordination store reachable again");
                    }
                    debug!(key = %key, "Lock acquired");
                    return Ok(LockHandle {
                        key,
                        token,
                        degraded: false,
                        acquired_at: Instant::now(),
                        _local: local_guard,
                    });
                }
                Ok(false) => {}
                Err(CoordinationError::Unavailable(reason)) => {
                    self.degraded.store(true, Ordering::Relaxed);
                    let total = self.degraded_acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        key = %key,
                        reason = %reason,
                        degraded_total = total,
                        "Coordination store unreachable; DEGRADED single-instance locking"
                    );
                    return Ok(LockHandle {
                        key,
                        token,
                        degraded: true,
                        acquired_at: Instant::now(),
                        _local: local_guard,
                    });
                }
                Err(CoordinationError::Backend(e)) => return Err(LockError::Backend(e)),
            }

            let now = Instant::now();
            if now + self.retry_interval > deadline {
                return Err(LockError::Timeout {
                    key,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}
