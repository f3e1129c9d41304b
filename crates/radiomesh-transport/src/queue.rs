//! Bounded FIFO that evicts its oldest entry to admit a new one.
//!
//! Producers push from non-async context (the radio's receive callback) and
//! never block. Consumers await `pop` with a deadline. A full queue always
//! accepts the newest item, so a stalled consumer costs old data rather than
//! wedging the producer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use radiomesh_core::Deadline;

pub struct EvictingQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// What happened to a pushed item.
#[derive(Debug, PartialEq, Eq)]
pub enum Push<T> {
    Queued,
    /// Queued after dropping the oldest entry, returned here.
    Evicted(T),
    /// The queue was closed; the item is handed back.
    Closed(T),
}

impl<T> EvictingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, item: T) -> Push<T> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return Push::Closed(item);
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(item);
            match evicted {
                Some(old) => Push::Evicted(old),
                None => Push::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Wait for the next item until `deadline`. Returns `None` on timeout or
    /// once the queue is closed and empty.
    pub async fn pop(&self, deadline: &Deadline) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            if deadline.run(notified).await.is_none() {
                return self.try_pop();
            }
        }
    }

    /// Close the queue, drop everything still in it and wake all waiters.
    /// Returns the number of items dropped. Idempotent.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            inner.closed = true;
            let n = inner.items.len();
            inner.items.clear();
            n
        };
        self.notify.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
