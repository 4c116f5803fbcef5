//! Bounded single-consumer FIFO used as a shard's inbox.
//!
//! Design:
//! - Producers never wait: `try_push` either accepts or hands the item back.
//! - Exactly one consumer (the shard worker) calls `pop`.
//! - `close` stops accepting new items; already queued items are still popped.
//! - Capacity 0 means direct handoff: a push is accepted only while the
//!   consumer is parked in `pop` and nothing is pending for it yet.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Why `try_push` handed the item back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Consumer is parked in `pop` and has not been handed an item yet.
    consumer_waiting: bool,
}

pub struct ShardQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> ShardQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                consumer_waiting: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    // ロック区間内で panic しないので poison は無視してよい
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking enqueue.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
            } else if state.consumer_waiting {
                // handoff: 待っている consumer に 1 件だけ渡す
                state.consumer_waiting = false;
                state.items.push_back(item);
            } else {
                return Err(PushError::Full(item));
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next item in FIFO order; `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    state.consumer_waiting = false;
                    return Some(item);
                }
                if state.closed {
                    state.consumer_waiting = false;
                    return None;
                }
                state.consumer_waiting = true;
            }
            // notify_one は permit を残すので、ロック解放後の push も取りこぼさない
            self.notify.notified().await;
        }
    }

    /// Reject further pushes. Queued items stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn consumer_waiting(&self) -> bool {
        self.lock().consumer_waiting
    }
}
