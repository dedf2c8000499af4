//! Delayed Work Queue
//!
//! A deadline-ordered queue shared by the replication workers. Items are
//! inserted either ready immediately or held back for a fixed delay; `pop`
//! blocks until the earliest ready item is available. Closing the queue
//! wakes every blocked consumer, and a closed queue never hands out another
//! item even if some are still pending.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Heap entry: ordered by deadline, insertion sequence breaks ties
struct Delayed<T> {
    ready_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.seq).cmp(&(other.ready_at, other.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Reverse<Delayed<T>>>,
    next_seq: u64,
    closed: bool,
}

/// Outcome of one non-blocking poll of the queue state
enum Poll<T> {
    Item(T),
    Closed,
    WaitUntil(Instant),
    Empty,
}

/// Delay-aware multi-producer multi-consumer queue
pub struct DelayedQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Wakeup channel: bumped on insert and close
    wake_tx: watch::Sender<u64>,
    wake_rx: watch::Receiver<u64>,
}

impl<T> DelayedQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            wake_tx,
            wake_rx,
        }
    }

    /// Insert an item that is ready immediately
    pub fn insert(&self, item: T) {
        self.insert_at(item, Instant::now());
    }

    /// Insert an item that becomes ready after `delay`
    pub fn insert_delayed(&self, item: T, delay: Duration) {
        self.insert_at(item, Instant::now() + delay);
    }

    fn insert_at(&self, item: T, ready_at: Instant) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                // Items offered after close are dropped
                return;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Reverse(Delayed {
                ready_at,
                seq,
                item,
            }));
        }
        self.wake();
    }

    /// Pop the next ready item, waiting for delays and arrivals
    ///
    /// Returns `None` once the queue has been closed; pending items are
    /// never delivered after close.
    pub async fn pop(&self) -> Option<T> {
        // The receiver is cloned before the first state check, so a wake
        // sent between a check and the wait below is still observed.
        let mut wake = self.wake_rx.clone();
        wake.mark_changed();

        loop {
            match self.poll_ready() {
                Poll::Item(item) => return Some(item),
                Poll::Closed => return None,
                Poll::WaitUntil(deadline) => {
                    tokio::select! {
                        _ = sleep_until(deadline) => {}
                        result = wake.changed() => {
                            if result.is_err() {
                                return None;
                            }
                        }
                    }
                }
                Poll::Empty => {
                    if wake.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn poll_ready(&self) -> Poll<T> {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return Poll::Closed;
        }

        let ready_at = match inner.heap.peek() {
            Some(Reverse(head)) => head.ready_at,
            None => return Poll::Empty,
        };

        if ready_at <= Instant::now() {
            let Reverse(entry) = inner.heap.pop().unwrap();
            Poll::Item(entry.item)
        } else {
            Poll::WaitUntil(ready_at)
        }
    }

    /// Close the queue and wake every blocked consumer
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.heap.clear();
        }
        self.wake();
    }

    /// Check whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Number of items currently queued (ready or delayed)
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wake(&self) {
        self.wake_tx.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl<T> Default for DelayedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
