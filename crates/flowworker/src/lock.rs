//! Per-run mutual exclusion.

use crate::error::LockError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[async_trait]
pub trait LockService: Send + Sync {
    /// Block until `key` is free or `timeout` elapses. The returned lease
    /// also expires after `timeout`.
    async fn acquire_lock(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, LockError>;
}

#[async_trait]
pub trait LockGuard: Send + Sync {
    fn key(&self) -> &str;

    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Retry schedule while a lock is held by someone else.
#[derive(Debug, Clone)]
pub struct LockBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl LockBackoff {
    fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max)
    }
}

impl Default for LockBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

type Leases = Arc<Mutex<HashMap<String, Lease>>>;

/// Process-local lock service with leased keys.
#[derive(Clone, Default)]
pub struct InMemoryLockService {
    leases: Leases,
    backoff: LockBackoff,
}

impl InMemoryLockService {
    pub fn new(backoff: LockBackoff) -> Self {
        Self {
            leases: Leases::default(),
            backoff,
        }
    }

    /// Whether an unexpired lease exists for `key`.
    pub async fn is_locked(&self, key: &str) -> bool {
        let leases = self.leases.lock().await;
        leases
            .get(key)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }

    async fn try_acquire(&self, key: &str, lease_for: Duration) -> Option<Uuid> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        if let Some(lease) = leases.get(key) {
            if lease.expires_at > now {
                return None;
            }
            tracing::warn!(key, "Taking over an expired lock lease");
        }
        let token = Uuid::new_v4();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: instant_after(now, lease_for),
            },
        );
        Some(token)
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire_lock(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>, LockError> {
        let started = Instant::now();
        let deadline = instant_after(started, timeout);
        let mut delay = self.backoff.initial;

        loop {
            if let Some(token) = self.try_acquire(key, timeout).await {
                tracing::debug!(key, "Lock acquired");
                return Ok(Box::new(InMemoryLockGuard {
                    key: key.to_string(),
                    token,
                    leases: self.leases.clone(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited_ms: (now - started).as_millis() as u64,
                });
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = self.backoff.next(delay);
        }
    }
}

/// `from + duration`, clamped to roughly thirty years out.
fn instant_after(from: Instant, duration: Duration) -> Instant {
    from.checked_add(duration)
        .unwrap_or_else(|| from + Duration::from_secs(86_400 * 365 * 30))
}

pub struct InMemoryLockGuard {
    key: String,
    token: Uuid,
    leases: Leases,
}

#[async_trait]
impl LockGuard for InMemoryLockGuard {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut leases = self.leases.lock().await;
        match leases.get(&self.key) {
            Some(lease) if lease.token == self.token => {
                leases.remove(&self.key);
                tracing::debug!(key = %self.key, "Lock released");
                Ok(())
            }
            _ => Err(LockError::NotHeld { key: self.key.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> InMemoryLockService {
        InMemoryLockService::new(LockBackoff {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            multiplier: 2.0,
        })
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let locks = service();
        let guard = locks.acquire_lock("run-1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(guard.key(), "run-1");
        assert!(locks.is_locked("run-1").await);

        guard.release().await.unwrap();
        assert!(!locks.is_locked("run-1").await);
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let locks = service();
        let _held = locks.acquire_lock("run-1", Duration::from_secs(5)).await.unwrap();

        let err = locks
            .acquire_lock("run-1", Duration::from_millis(30))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "run-1"));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = service();
        let held = locks.acquire_lock("run-1", Duration::from_secs(5)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_lock("run-1", Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await.unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let locks = service();
        let stale = locks.acquire_lock("run-1", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = locks.acquire_lock("run-1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            stale.release().await,
            Err(LockError::NotHeld { key: "run-1".to_string() })
        );
        fresh.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let locks = InMemoryLockService::default();
        let guard = locks.acquire_lock("run-1", Duration::MAX).await.unwrap();
        assert!(locks.is_locked("run-1").await);
        guard.release().await.unwrap();
        assert!(!locks.is_locked("run-1").await);
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = LockBackoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(25),
            multiplier: 2.0,
        };
        assert_eq!(backoff.next(Duration::from_millis(10)), Duration::from_millis(20));
        assert_eq!(backoff.next(Duration::from_millis(20)), Duration::from_millis(25));
    }
}
