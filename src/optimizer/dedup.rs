//! In-flight request de-duplication.
//!
//! The first caller for a fingerprint becomes the leader and performs the
//! network call. Callers arriving while it is in flight become followers and
//! receive a clone of the leader's outcome.

use crate::{Error, Result};
use dashmap::{DashMap, mapref::entry::Entry};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<Value>>;

/// Outcome of [`InFlightRegistry::join_or_lead`].
#[derive(Debug)]
pub enum Join {
    /// Another caller owns the request; await its outcome.
    Follower(Follower),
    /// This caller owns the request and must settle it.
    Leader(LeaderGuard),
}

/// Tracks requests currently in flight and the callers waiting on them.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    entries: Arc<DashMap<String, Vec<Waiter>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the request in flight under `key`, or registers a new one.
    ///
    /// Registration and lookup happen under the same shard lock, so two
    /// concurrent callers can never both become leader for one key.
    pub fn join_or_lead(&self, key: &str) -> Join {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let (tx, rx) = oneshot::channel();
                entry.get_mut().push(tx);
                tracing::debug!(key = %key, waiters = entry.get().len(), "Joined in-flight request");
                Join::Follower(Follower { rx })
            }
            Entry::Vacant(entry) => {
                entry.insert(Vec::new());
                Join::Leader(LeaderGuard {
                    entries: Arc::clone(&self.entries),
                    key: key.to_string(),
                    settled: false,
                })
            }
        }
    }

    /// Joins the request in flight under `key` if there is one, without
    /// registering a new entry.
    pub fn follow(&self, key: &str) -> Option<Follower> {
        let mut waiters = self.entries.get_mut(key)?;
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        tracing::debug!(key = %key, waiters = waiters.len(), "Joined in-flight request");
        Some(Follower { rx })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of followers waiting on `key`, not counting the leader.
    pub fn waiter_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |waiters| waiters.len())
    }

    /// Number of distinct requests in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A caller waiting on another caller's request.
#[derive(Debug)]
pub struct Follower {
    rx: oneshot::Receiver<Result<Value>>,
}

impl Follower {
    /// Waits for the leader's outcome.
    ///
    /// If the leader goes away without settling, the follower gets a
    /// `Deduplication` error instead of waiting forever.
    pub async fn wait(self) -> Result<Value> {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::deduplication(
                "In-flight request was abandoned before completing",
            ))
        })
    }
}

/// Ownership of an in-flight entry.
///
/// Dropping the guard without settling removes the entry; waiting followers
/// then fail with a `Deduplication` error.
#[derive(Debug)]
pub struct LeaderGuard {
    entries: Arc<DashMap<String, Vec<Waiter>>>,
    key: String,
    settled: bool,
}

impl LeaderGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delivers `result` to every waiter and removes the entry. Returns the
    /// number of waiters that were notified.
    pub fn settle(mut self, result: &Result<Value>) -> usize {
        let waiters = self.take_waiters();
        let count = waiters.len();
        for waiter in waiters {
            // a follower that stopped waiting is not an error
            let _ = waiter.send(result.clone());
        }
        if count > 0 {
            tracing::debug!(key = %self.key, waiters = count, "Settled de-duplicated request");
        }
        count
    }

    /// Rejects every waiter because the response is a stream that can only
    /// be consumed once.
    pub fn release_streaming(mut self) {
        let waiters = self.take_waiters();
        if !waiters.is_empty() {
            tracing::warn!(
                key = %self.key,
                waiters = waiters.len(),
                "Streaming response cannot be shared, rejecting waiters"
            );
        }
        let error = Error::deduplication("Streaming response cannot be shared between callers");
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn take_waiters(&mut self) -> Vec<Waiter> {
        self.settled = true;
        self.entries
            .remove(&self.key)
            .map(|(_, waiters)| waiters)
            .unwrap_or_default()
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(key = %self.key, "Leader dropped before settling");
            // senders drop with the entry, which wakes the followers
            self.entries.remove(&self.key);
        }
    }
}
