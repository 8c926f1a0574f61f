use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::core_types::AccountId;

/// Per-instance minimum spacing between user-initiated mutations
pub struct CooldownTracker {
    window: Duration,
    last: DashMap<AccountId, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: DashMap::new(),
        }
    }

    /// `Err(remaining)` while the window since the last success is open
    pub fn check(&self, account: &AccountId) -> Result<(), Duration> {
        if self.window.is_zero() {
            return Ok(());
        }
        match self.last.get(account) {
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed < self.window {
                    Err(self.window - elapsed)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    pub fn stamp(&self, account: &AccountId) {
        if !self.window.is_zero() {
            self.last.insert(*account, Instant::now());
        }
    }

    /// Drop entries whose window has closed
    pub fn purge(&self) {
        let window = self.window;
        self.last.retain(|_, at| at.elapsed() < window);
    }

    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}
