//! Completion primitives used by the service lifecycle.
//!
//! - [`ReadySignal`]: write-once, read-many completion handle
//! - [`SingleFlight`]: at most one in-flight computation per key

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, OnceCell};

/// Outcome carried by a [`ReadySignal`]
pub type Outcome = std::result::Result<(), String>;

/// One-shot completion that any number of tasks can await.
///
/// Only the first `resolve` takes effect; later calls are ignored.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<Option<Outcome>>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve the signal. Returns false if it was already resolved.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome);
                true
            } else {
                false
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the signal is resolved and return its outcome
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.tx.subscribe();
        let outcome = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().unwrap_or(Ok(())),
            // unreachable while `self` holds the sender
            Err(_) => Err("ready signal dropped".to_string()),
        };
        outcome
    }
}

/// Deduplicates concurrent calls per key.
///
/// While a computation for a key is running, other callers for the same key
/// await its result instead of starting their own. Once it finishes the key
/// is released and the next call starts fresh.
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(key.clone()).or_default())
        };

        let value = cell.get_or_init(f).await.clone();

        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            map.remove(&key);
        }
        value
    }

    /// Whether a computation for `key` is currently running
    pub fn is_running(&self, key: &K) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_signal_is_write_once() {
        let signal = ReadySignal::new();
        assert!(!signal.is_resolved());

        assert!(signal.resolve(Err("boom".into())));
        assert!(!signal.resolve(Ok(())));

        assert_eq!(signal.wait().await, Err("boom".to_string()));
        assert_eq!(signal.wait().await, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_ready_signal_wakes_waiters() {
        let signal = ReadySignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.resolve(Ok(()));

        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_single_flight_shares_in_flight_result() {
        let flight: Arc<SingleFlight<&'static str, usize>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("mods", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        calls.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flight.is_running(&"mods"));
    }

    #[tokio::test]
    async fn test_single_flight_reruns_after_completion() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        assert_eq!(flight.run(1, || async { 10 }).await, 10);
        assert_eq!(flight.run(1, || async { 20 }).await, 20);
        // independent keys do not share
        assert_eq!(flight.run(2, || async { 30 }).await, 30);
    }
}
