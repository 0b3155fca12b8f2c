//! Bounded priority work queue
//!
//! Higher priority dispatches first; equal priority is FIFO by push
//! order. Retried jobs re-enter with a future ready time and stay
//! parked until due. Producers block once the depth crosses the
//! high-water mark and resume when it drains below the low-water mark.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::Notify;
use tokio::time::Instant;

use silo_core::config::QueueSettings;
use silo_core::CancelToken;

struct Entry<T> {
    priority: u8,
    seq: u64,
    job: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority wins, then earlier seq
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Delayed<T> {
    ready_at: Instant,
    entry: Entry<T>,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.entry == other.entry
    }
}
impl<T> Eq for Delayed<T> {}

impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on ready time via reversed compare
        other.ready_at.cmp(&self.ready_at)
    }
}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner<T> {
    ready: BinaryHeap<Entry<T>>,
    delayed: BinaryHeap<Delayed<T>>,
    next_seq: u64,
    closed: bool,
}

impl<T> Inner<T> {
    fn depth(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// Move everything whose ready time has passed into the ready heap
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .map(|d| d.ready_at <= now)
            .unwrap_or(false)
        {
            let due = self.delayed.pop().expect("peeked");
            self.ready.push(due.entry);
        }
    }
}

/// Bounded priority queue shared by a producer and a worker set
pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    /// New work or closure
    work: Notify,
    /// Depth fell below the low-water mark
    space: Notify,
    high_water: usize,
    low_water: usize,
}

impl<T> JobQueue<T> {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: BinaryHeap::new(),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            work: Notify::new(),
            space: Notify::new(),
            high_water: settings.high_water,
            low_water: settings.low_water,
        }
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().depth()
    }

    /// Enqueue, blocking while the queue sits above the high-water mark.
    /// Returns false if the queue closed or cancellation fired first.
    pub async fn push(&self, priority: u8, job: T, cancel: &CancelToken) -> bool {
        loop {
            // register for the space signal before checking depth, so a
            // concurrent drain between check and await cannot be missed
            let mut space = std::pin::pin!(self.space.notified());
            space.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return false;
                }
                if inner.depth() < self.high_water {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    inner.ready.push(Entry { priority, seq, job });
                    drop(inner);
                    self.work.notify_waiters();
                    return true;
                }
            }
            tokio::select! {
                _ = &mut space => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Re-enqueue a retried job for a future ready time. Retries bypass
    /// backpressure so workers can always park their own work.
    pub fn push_delayed(&self, priority: u8, job: T, ready_at: Instant) {
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.delayed.push(Delayed {
                ready_at,
                entry: Entry { priority, seq, job },
            });
        }
        self.work.notify_waiters();
    }

    /// Take the next due job, waiting for work, a parked job coming due,
    /// closure, or cancellation. None means the queue is finished.
    pub async fn pop(&self, cancel: &CancelToken) -> Option<T> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            // register for the work signal before inspecting the heaps,
            // so a push landing between inspection and await still wakes
            // this worker
            let mut work = std::pin::pin!(self.work.notified());
            work.as_mut().enable();

            let wait_until = {
                let mut inner = self.inner.lock();
                inner.promote_due(Instant::now());

                if let Some(entry) = inner.ready.pop() {
                    let below_low = inner.depth() < self.low_water;
                    drop(inner);
                    if below_low {
                        self.space.notify_waiters();
                    }
                    return Some(entry.job);
                }
                if inner.closed && inner.delayed.is_empty() {
                    return None;
                }
                inner.delayed.peek().map(|d| d.ready_at)
            };

            match wait_until {
                Some(deadline) => tokio::select! {
                    _ = &mut work => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancel.cancelled() => return None,
                },
                None => tokio::select! {
                    _ = &mut work => {}
                    _ = cancel.cancelled() => return None,
                },
            }
        }
    }

    /// No more pushes; workers drain what remains and stop
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.work.notify_waiters();
        self.space.notify_waiters();
    }

    /// Remove and return every remaining job (cancellation path)
    pub fn drain_remaining(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.depth());
        while let Some(entry) = inner.ready.pop() {
            out.push(entry.job);
        }
        while let Some(delayed) = inner.delayed.pop() {
            out.push(delayed.entry.job);
        }
        drop(inner);
        self.space.notify_waiters();
        out
    }
}
