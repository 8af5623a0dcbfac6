//! In-flight negotiation registry.
//!
//! Keyed by (operation, stream kind). Two disciplines are offered:
//!
//! - [`InflightRegistry::collapse`]: concurrent callers for the same key share
//!   one execution and all observe its result, which stays cached for the
//!   registry's lifetime (connect negotiation).
//! - [`InflightRegistry::try_begin`]: a second caller for a key that is still
//!   in flight is refused (produce negotiation).

use crate::media::StreamKind;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Negotiation kinds tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Produce,
}

impl Operation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Produce => "produce",
        }
    }
}

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub operation: Operation,
    pub kind: Option<StreamKind>,
}

impl OperationKey {
    #[must_use]
    pub const fn connect() -> Self {
        Self {
            operation: Operation::Connect,
            kind: None,
        }
    }

    #[must_use]
    pub const fn produce(kind: StreamKind) -> Self {
        Self {
            operation: Operation::Produce,
            kind: Some(kind),
        }
    }
}

/// Tracks in-flight and settled negotiations.
pub struct InflightRegistry<T> {
    settled: Mutex<HashMap<OperationKey, Arc<OnceCell<T>>>>,
    running: Arc<Mutex<HashSet<OperationKey>>>,
}

impl<T: Clone> InflightRegistry<T> {
    pub fn new() -> Self {
        Self {
            settled: Mutex::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run `init` at most once for `key`; every caller gets the same result.
    ///
    /// A caller arriving while `init` runs waits for it. If the running
    /// caller is dropped before settling, the next waiter runs `init` again.
    pub async fn collapse<F, Fut>(&self, key: OperationKey, init: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut settled = self.settled.lock().unwrap_or_else(PoisonError::into_inner);
            settled
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(init).await.clone()
    }

    /// Claim `key` for exclusive execution.
    ///
    /// Returns `None` if another caller holds it. The claim is released when
    /// the returned guard is dropped.
    pub fn try_begin(&self, key: OperationKey) -> Option<InflightGuard> {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);

        inserted.then(|| InflightGuard {
            key,
            running: Arc::clone(&self.running),
        })
    }

    /// Whether `key` is currently claimed through [`InflightRegistry::try_begin`].
    pub fn is_running(&self, key: OperationKey) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }
}

impl<T: Clone> Default for InflightRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive claim on one registry key.
#[derive(Debug)]
pub struct InflightGuard {
    key: OperationKey,
    running: Arc<Mutex<HashSet<OperationKey>>>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_collapse_runs_once_and_caches_result() {
        let registry: InflightRegistry<Result<u32, String>> = InflightRegistry::new();
        let runs = AtomicUsize::new(0);

        let first = registry
            .collapse(OperationKey::connect(), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Err("dtls failed".to_string())
            })
            .await;
        let second = registry
            .collapse(OperationKey::connect(), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(first, Err("dtls failed".to_string()));
        assert_eq!(second, first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_collapse_shares_one_execution() {
        let registry: Arc<InflightRegistry<u32>> = Arc::new(InflightRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    registry
                        .collapse(OperationKey::connect(), || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            42
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_begin_is_exclusive_per_key() {
        let registry: InflightRegistry<()> = InflightRegistry::new();
        let camera = OperationKey::produce(StreamKind::CameraVideo);
        let screen = OperationKey::produce(StreamKind::ScreenVideo);

        let guard = registry.try_begin(camera).expect("first claim succeeds");
        assert!(registry.try_begin(camera).is_none());
        assert!(registry.try_begin(screen).is_some());
        assert!(registry.is_running(camera));

        drop(guard);
        assert!(!registry.is_running(camera));
        assert!(registry.try_begin(camera).is_some());
    }
}
