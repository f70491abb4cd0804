use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking FIFO handoff between one task producer and any number of workers.
///
/// `dequeue` returns `None` once the input was closed and every queued item was taken;
/// that is the end-of-stream signal, delivered to every consumer.
pub struct LocalTaskQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T> LocalTaskQueue<T> {
    /// `capacity == None` never blocks the producer.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.map(|cap| cap.max(1)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().expect("task queue mutex poisoned")
    }

    /// Appends `item`, blocking while the queue is full. Hands the item back if the input
    /// side has already been closed.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if let Some(capacity) = self.capacity {
            while !state.closed && state.items.len() >= capacity {
                state = self
                    .not_full
                    .wait(state)
                    .expect("task queue mutex poisoned");
            }
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest item, blocking while the queue is empty and still open.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .expect("task queue mutex poisoned");
        }
    }

    /// Marks the end of the input stream. Returns `false` if it was already closed.
    pub fn close_input(&self) -> bool {
        let mut state = self.lock();
        let first = !state.closed;
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<T> Default for LocalTaskQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
