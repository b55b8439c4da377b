use crate::error::QueueError;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Circular buffer state, only ever touched under the queue lock
#[derive(Debug)]
struct QueueState<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
    shutdown: bool,
    produced: u64,
    consumed: u64,
    producer_blocks: u64,
    consumer_blocks: u64,
}

impl<T> QueueState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn push_back(&mut self, item: T) {
        debug_assert!(self.slots[self.tail].is_none());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
        self.produced += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        let item = self.slots[self.head].take()?;
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        self.consumed += 1;
        Some(item)
    }
}

/// Point-in-time counters of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub produced: u64,
    pub consumed: u64,
    /// Number of times a pusher had to wait for space
    pub producer_blocks: u64,
    /// Number of times a popper had to wait for an item
    pub consumer_blocks: u64,
    pub len: usize,
}

/// A fixed-capacity FIFO with deadline-bounded blocking push/pop and
/// cooperative shutdown.
///
/// Both operations take an absolute deadline. Waiters re-check their
/// predicate after every wake, so spurious wakeups and several threads
/// racing for the same slot are handled. Once [`request_shutdown`] has been
/// called no push succeeds again, while items enqueued before it can still be
/// drained by `pop`.
///
/// [`request_shutdown`]: TimedBoundedQueue::request_shutdown
#[derive(Debug)]
pub struct TimedBoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> TimedBoundedQueue<T> {
    /// Create a new queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert_ne!(capacity, 0, "queue capacity must be non-zero");
        Self {
            state: Mutex::new(QueueState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                shutdown: false,
                produced: 0,
                consumed: 0,
                producer_blocks: 0,
                consumer_blocks: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Insert `item` at the tail, waiting for space until `deadline`.
    ///
    /// Fails with [`QueueError::Timeout`] if the queue is still full when the
    /// deadline passes, or [`QueueError::Shutdown`] if shutdown is (or
    /// becomes) visible. The item is dropped on failure.
    pub fn push(&self, item: T, deadline: Instant) -> Result<(), QueueError> {
        let mut state = self.state.lock();

        while state.is_full() && !state.shutdown {
            state.producer_blocks += 1;
            let timed_out = self.not_full.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.is_full() && !state.shutdown {
                return Err(QueueError::Timeout);
            }
        }

        if state.shutdown {
            return Err(QueueError::Shutdown);
        }

        state.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the item at the head, waiting for one until `deadline`.
    ///
    /// Items already enqueued are still returned after shutdown; only an
    /// empty queue under shutdown yields [`QueueError::Shutdown`].
    pub fn pop(&self, deadline: Instant) -> Result<T, QueueError> {
        let mut state = self.state.lock();

        while state.count == 0 && !state.shutdown {
            state.consumer_blocks += 1;
            let timed_out = self.not_empty.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.count == 0 && !state.shutdown {
                return Err(QueueError::Timeout);
            }
        }

        match state.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Ok(item)
            }
            None => Err(QueueError::Shutdown),
        }
    }

    /// [`push`](Self::push) with a deadline of `timeout` from now
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), QueueError> {
        self.push(item, Instant::now() + timeout)
    }

    /// [`pop`](Self::pop) with a deadline of `timeout` from now
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        self.pop(Instant::now() + timeout)
    }

    /// Set the shutdown flag and wake every blocked pusher and popper.
    /// Calling it again has no further effect.
    pub fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Get the current number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    /// Get the utilization of the queue as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        let state = self.state.lock();
        ((state.count * 100) / state.capacity()) as u32
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            produced: state.produced,
            consumed: state.consumed,
            producer_blocks: state.producer_blocks,
            consumer_blocks: state.consumer_blocks,
            len: state.count,
        }
    }
}
