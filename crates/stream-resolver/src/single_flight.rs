//! Request deduplication keyed by an arbitrary id.
//!
//! The first caller for a key becomes the owner: its work runs in a spawned
//! task and every later caller for the same key joins and waits for that one
//! result. A waiter that gives up only drops its own wait; the work finishes
//! for everyone else. The in-flight marker is removed before the result is
//! published, so any caller arriving after completion starts fresh.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, OnceCell};
use tracing::warn;

use crate::error::ResolveError;

pub type FlightResult<V> = Result<V, ResolveError>;

struct InFlightState<V> {
    result: OnceCell<FlightResult<V>>,
    notify: Notify,
}

impl<V: Clone> InFlightState<V> {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: FlightResult<V>) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> FlightResult<V> {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Handle to an in-flight (or just finished) operation.
pub struct Flight<V> {
    state: Arc<InFlightState<V>>,
    is_owner: bool,
}

impl<V: Clone> Flight<V> {
    /// Wait for the shared result. Dropping this future does not affect the
    /// operation or other waiters.
    pub async fn wait(&self) -> FlightResult<V> {
        self.state.wait().await
    }

    /// Whether this handle started the operation rather than joining it.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

/// Clears the in-flight marker and publishes exactly once, including when the
/// owner task panics or is dropped by the runtime.
struct CompletionGuard<K: Eq + Hash, V: Clone> {
    in_flight: Arc<DashMap<K, Arc<InFlightState<V>>>>,
    key: K,
    state: Arc<InFlightState<V>>,
    completed: bool,
}

impl<K: Eq + Hash, V: Clone> CompletionGuard<K, V> {
    fn clear_marker(&self) {
        self.in_flight
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.state));
    }

    fn complete(mut self, result: FlightResult<V>) {
        self.clear_marker();
        self.state.set_result(result);
        self.completed = true;
    }
}

impl<K: Eq + Hash, V: Clone> Drop for CompletionGuard<K, V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!("In-flight operation stopped before publishing a result");
        self.clear_marker();
        self.state.set_result(Err(ResolveError::Aborted(
            "owner task stopped before completing".to_string(),
        )));
    }
}

/// Join-or-start registry of in-flight operations.
pub struct SingleFlight<K, V> {
    in_flight: Arc<DashMap<K, Arc<InFlightState<V>>>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the operation for `key`, or start one with `work` if none is running.
    ///
    /// `work` is only invoked by the owner. Must be called inside a Tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: K, work: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult<V>> + Send + 'static,
    {
        let state = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                return Flight {
                    state: entry.get().clone(),
                    is_owner: false,
                };
            }
            Entry::Vacant(entry) => {
                let state = Arc::new(InFlightState::new());
                entry.insert(state.clone());
                state
            }
        };

        let guard = CompletionGuard {
            in_flight: self.in_flight.clone(),
            key,
            state: state.clone(),
            completed: false,
        };
        let fut = work();
        tokio::spawn(async move {
            let result = fut.await;
            guard.complete(result);
        });

        Flight {
            state,
            is_owner: true,
        }
    }

    /// Join or start, then wait for the shared result.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> FlightResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult<V>> + Send + 'static,
    {
        self.join_or_start(key, work).wait().await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
