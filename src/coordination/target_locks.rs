//! Per-Target Serialization Tokens
//!
//! Every mutating operation on a named target (crash restart, resource restart,
//! service restart, kill) holds that target's token for its whole duration, so
//! the supervisor and the self-heal engine can never act on the same name at once.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of per-target tokens
#[derive(Clone, Default)]
pub struct TargetLocks {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held token; released on drop
pub struct TargetGuard {
    target: String,
    _guard: OwnedMutexGuard<()>,
}

impl TargetGuard {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        debug!("Released serialization token for {}", self.target);
    }
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, target: &str) -> Arc<Mutex<()>> {
        self.slots
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Wait for the token of `target`
    pub async fn acquire(&self, target: &str) -> TargetGuard {
        let guard = self.slot(target).lock_owned().await;
        debug!("Acquired serialization token for {}", target);
        TargetGuard {
            target: target.to_string(),
            _guard: guard,
        }
    }

    /// Take the token only if nobody else holds it
    pub fn try_acquire(&self, target: &str) -> Option<TargetGuard> {
        let guard = self.slot(target).try_lock_owned().ok()?;
        debug!("Acquired serialization token for {}", target);
        Some(TargetGuard {
            target: target.to_string(),
            _guard: guard,
        })
    }

    pub fn is_held(&self, target: &str) -> bool {
        self.slots
            .get(target)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_acquire_fails_while_held() {
        let locks = TargetLocks::new();
        let guard = locks.acquire("core").await;
        assert_eq!(guard.target(), "core");
        assert!(locks.is_held("core"));
        assert!(locks.try_acquire("core").is_none());

        // Other targets are independent
        assert!(locks.try_acquire("reporter").is_some());

        drop(guard);
        assert!(!locks.is_held("core"));
        assert!(locks.try_acquire("core").is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = TargetLocks::new();
        let guard = locks.acquire("core").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("core").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
