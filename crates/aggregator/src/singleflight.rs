//! Request coalescing for identical cache keys.
//!
//! Concurrent misses on the same key share one upstream fan-out: the first
//! caller becomes the leader and the rest subscribe to its outcome. The
//! leader's work is expected to run on a detached task, so a waiter (or the
//! leading request itself) going away never cancels it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type FlightMap<T> = Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>;

/// Coalesces concurrent calls by key. `T` is the shared outcome type.
pub struct SingleFlight<T: Clone> {
    inflight: FlightMap<T>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`. The first caller gets
    /// [`Flight::Leader`] and must eventually resolve the handle; everyone
    /// else gets [`Flight::Waiter`].
    pub fn join(&self, key: &str) -> Flight<T> {
        let mut map = self.inflight.lock();
        if let Some(rx) = map.get(key) {
            return Flight::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx.clone());
        Flight::Leader(
            CompletionHandle {
                key: key.to_string(),
                tx,
                inflight: self.inflight.clone(),
                resolved: false,
            },
            rx,
        )
    }

    #[cfg(test)]
    fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub enum Flight<T: Clone> {
    /// This caller runs the work; the receiver lets it await the published
    /// outcome like any waiter.
    Leader(CompletionHandle<T>, watch::Receiver<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

/// Publishes the flight outcome. Dropping the handle unresolved closes the
/// channel, which waiters observe and recover from.
pub struct CompletionHandle<T: Clone> {
    key: String,
    tx: watch::Sender<Option<T>>,
    inflight: FlightMap<T>,
    resolved: bool,
}

impl<T: Clone> CompletionHandle<T> {
    /// Publish the outcome and retire the flight. Callers arriving after
    /// this start a fresh flight (the result is normally in the cache by
    /// then).
    pub fn resolve(mut self, value: T) {
        self.inflight.lock().remove(&self.key);
        self.resolved = true;
        let _ = self.tx.send(Some(value));
    }
}

impl<T: Clone> Drop for CompletionHandle<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.inflight.lock().remove(&self.key);
        }
    }
}

/// Await a flight outcome. Returns `None` when the flight was abandoned
/// (leader dropped without resolving).
pub async fn await_outcome<T: Clone>(mut rx: watch::Receiver<Option<T>>) -> Option<T> {
    loop {
        if let Some(value) = rx.borrow().clone() {
            return Some(value);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}
