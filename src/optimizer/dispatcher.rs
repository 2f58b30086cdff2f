//! Bounded-concurrency dispatcher with priority levels.
//!
//! At most `max_concurrent` permits are out at once, except that
//! high-priority requests may bypass the bound under
//! [`HighPriorityPolicy::Bypass`]. Everything else waits in FIFO order and
//! is handed a permit by the request that finishes before it. Under
//! [`HighPriorityPolicy::JumpQueue`] queued high-priority requests are served
//! before any normal or low priority one, still FIFO among themselves.

use crate::{Error, HighPriorityPolicy, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;

/// Scheduling priority of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Skips the queue, see [`HighPriorityPolicy`].
    High,
    #[default]
    Normal,
    /// Scheduled like `Normal`; used for cache warm-up traffic.
    Low,
}

type Waiter = oneshot::Sender<DispatchPermit>;

#[derive(Debug, Default)]
struct State {
    active: usize,
    /// High-priority waiters under `JumpQueue`, drained first.
    urgent: VecDeque<Waiter>,
    queue: VecDeque<Waiter>,
}

impl State {
    fn next_waiter(&mut self) -> Option<Waiter> {
        self.urgent.pop_front().or_else(|| self.queue.pop_front())
    }

    fn waiting(&self) -> impl Iterator<Item = &Waiter> {
        self.urgent.iter().chain(self.queue.iter())
    }
}

#[derive(Debug)]
struct Shared {
    max_concurrent: usize,
    policy: HighPriorityPolicy,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out execution permits. Clones share the same bound and queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Creates a dispatcher. A bound of zero is treated as one.
    pub fn new(max_concurrent: usize, policy: HighPriorityPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrent: max_concurrent.max(1),
                policy,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Waits for a permit to execute a request.
    pub async fn acquire(&self, priority: Priority) -> Result<DispatchPermit> {
        let rx = {
            let mut state = self.shared.lock();
            let bypass =
                priority == Priority::High && self.shared.policy == HighPriorityPolicy::Bypass;

            if bypass || state.active < self.shared.max_concurrent {
                state.active += 1;
                return Ok(self.permit());
            }

            let (tx, rx) = oneshot::channel();
            if priority == Priority::High {
                state.urgent.push_back(tx);
            } else {
                state.queue.push_back(tx);
            }
            tracing::debug!(
                ?priority,
                active = state.active,
                queued = state.urgent.len() + state.queue.len(),
                "Concurrency limit reached, request queued"
            );
            rx
        };

        rx.await
            .map_err(|_| Error::internal("Dispatcher dropped a queued request"))
    }

    /// Permits currently held, including bypassing high-priority ones.
    pub fn active(&self) -> usize {
        self.shared.lock().active
    }

    /// Requests waiting for a permit.
    pub fn queued(&self) -> usize {
        self.shared
            .lock()
            .waiting()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    fn permit(&self) -> DispatchPermit {
        DispatchPermit {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Right to execute one request. Dropping it frees the slot and hands it to
/// the next queued request.
#[derive(Debug)]
pub struct DispatchPermit {
    shared: Arc<Shared>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        let handoffs = {
            let mut state = self.shared.lock();
            state.active = state.active.saturating_sub(1);

            let mut handoffs = Vec::new();
            while state.active < self.shared.max_concurrent {
                let Some(waiter) = state.next_waiter() else {
                    break;
                };
                if waiter.is_closed() {
                    continue;
                }
                state.active += 1;
                handoffs.push(waiter);
            }
            handoffs
        };

        // Sent outside the lock: a permit bounced back by a receiver that
        // went away in the meantime is dropped here and re-enters this path.
        for waiter in handoffs {
            let _ = waiter.send(DispatchPermit {
                shared: Arc::clone(&self.shared),
            });
        }
    }
}
