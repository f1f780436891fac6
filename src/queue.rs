//! Per-credential request serialization.
//!
//! At most one call per queue key is in flight. Later calls for the same key
//! wait in FIFO order; calls for different keys never wait on each other. A
//! call that fails or panics still releases its slot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Gate = Arc<AsyncMutex<()>>;

#[derive(Clone, Default)]
pub struct RequestQueue {
    gates: Arc<Mutex<HashMap<String, Gate>>>,
}

/// Holding a slot means owning the key's turn. Dropping it lets the next
/// waiter run.
pub struct QueueSlot {
    queue: RequestQueue,
    key: String,
    gate: Gate,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the key's turn.
    pub async fn acquire(&self, key: &str) -> QueueSlot {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            gates
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = gate.clone().lock_owned().await;
        QueueSlot {
            queue: self.clone(),
            key: key.to_string(),
            gate,
            guard: Some(guard),
        }
    }

    /// Run `fut` once every earlier call for `key` has completed.
    pub async fn run<F, T>(&self, key: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = self.acquire(key).await;
        fut.await
    }

    /// Number of keys with a holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        {
            let mut gates = self
                .queue
                .gates
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // The map and this slot are the only owners: nobody is waiting.
            let idle = gates
                .get(&self.key)
                .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(g) == 3);
            if idle {
                gates.remove(&self.key);
            }
        }
        self.guard.take();
    }
}
