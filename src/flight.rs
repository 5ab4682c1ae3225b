//! Per-key single-flight coordination
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it is in flight wait for and receive a clone of the
//! leader's outcome instead of starting their own.

use crate::error::{ConnectorError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Outcome<V> = Option<Result<V>>;

pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, watch::Receiver<Outcome<V>>>>,
}

enum Role<V> {
    Leader(watch::Sender<Outcome<V>>),
    Follower(watch::Receiver<Outcome<V>>),
}

/// Removes the leader's entry even when its future is dropped mid-flight
struct LeaderSlot<'a, K: Eq + Hash, V> {
    flight: &'a SingleFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for LeaderSlot<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flight.lock().remove(&key);
        }
    }
}

impl<K: Eq + Hash, V> SingleFlight<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, watch::Receiver<Outcome<V>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys with work currently in flight
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Run `work` for `key` unless another caller already is
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let role = {
            let mut map = self.lock();
            match map.get(&key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    map.insert(key.clone(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                let outcome = rx.wait_for(Option::is_some).await.map(|r| (*r).clone());
                match outcome {
                    Ok(Some(result)) => result,
                    _ => Err(ConnectorError::network(
                        "in-flight request was abandoned before completing",
                    )),
                }
            }
            Role::Leader(tx) => {
                let _slot = LeaderSlot {
                    flight: self,
                    key: Some(key),
                };
                let result = work().await;
                // Publish before the slot is released so late joiners see it
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
