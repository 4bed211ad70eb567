//! Cross-thread ingress queue feeding the owner thread.
//!
//! Any thread may push work; only the owner thread dequeues. The dequeue side
//! suspends on a semaphore whose permits mirror the number of queued items, so
//! `stop()` can wake a blocked consumer by closing the semaphore.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Multi-producer, single-consumer queue with a stoppable async dequeue.
pub struct IngressQueue<T> {
    state: Mutex<State<T>>,
    available: Semaphore,
}

impl<T> IngressQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                stopped: false,
            }),
            available: Semaphore::new(0),
        }
    }

    /// Append an item. Hands the item back if the queue has been stopped.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Append all items or none of them.
    pub fn enqueue_many(&self, items: Vec<T>) -> Result<(), Vec<T>> {
        let count = items.len();
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(items);
            }
            state.items.extend(items);
        }
        if count > 0 {
            self.available.add_permits(count);
        }
        Ok(())
    }

    /// Wait for the next item.
    ///
    /// Returns `None` when `timeout` elapses or when the queue is stopped while
    /// waiting. A `None` timeout waits without bound.
    pub async fn dequeue(&self, timeout: Option<Duration>) -> Option<T> {
        let acquire = self.available.acquire();
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.ok()?,
            None => acquire.await,
        };

        match permit {
            Ok(permit) => {
                permit.forget();
                self.state.lock().items.pop_front()
            }
            // Closed by stop().
            Err(_) => None,
        }
    }

    /// Take the next item without suspending.
    ///
    /// After `stop()` this keeps draining whatever was accepted before.
    pub fn try_dequeue(&self) -> Option<T> {
        match self.available.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return None,
            Err(TryAcquireError::Closed) => {}
        }
        self.state.lock().items.pop_front()
    }

    /// Remove everything still queued.
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Some(item) = self.try_dequeue() {
            drained.push(item);
        }
        drained
    }

    /// Refuse further insertions and wake a blocked `dequeue`.
    ///
    /// Items already queued stay available through `try_dequeue`/`drain`.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.available.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for IngressQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
