//! The replayable request buffer.
//!
//! A retried or hedged call runs its request producer exactly once; the
//! produced messages land in a [`ReplayBuffer`] and every attempt reads
//! from its own [`ReplaySubscriber`] cursor starting at position zero.
//!
//! The buffer is bounded. The producer only evicts an item once every live
//! subscriber has read past it, so an in-flight attempt always sees the
//! whole sequence; with no subscribers it evicts freely rather than block.
//! Once anything has been evicted the sequence can no longer be replayed
//! from the start, [`subscribe`](ReplayBuffer::subscribe) refuses new
//! cursors, and the executor surfaces whatever response it has instead of
//! retrying.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use plexrpc_core::RpcError;
use tokio::sync::watch;

/// Why a subscriber stopped receiving items.
#[derive(Clone, Debug)]
pub enum ReplayError {
    /// The executor invalidated all current subscribers.
    Invalidated,
    /// The request producer itself failed.
    Failed(RpcError),
}

struct State<T> {
    /// Absolute position of `items[0]`.
    base: u64,
    items: VecDeque<T>,
    closed: bool,
    failed: Option<RpcError>,
    /// Bumped on invalidation; subscribers from older epochs are dead.
    epoch: u64,
    /// Live subscriber cursors: id -> next absolute position to read.
    cursors: HashMap<u64, u64>,
    next_id: u64,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    /// Bumped on every state change; waiters watch it.
    version: watch::Sender<u64>,
}

impl<T> Inner<T> {
    fn touch(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Bounded single-producer broadcast buffer with replay from position zero.
pub struct ReplayBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ReplayBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> ReplayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    base: 0,
                    items: VecDeque::new(),
                    closed: false,
                    failed: None,
                    epoch: 0,
                    cursors: HashMap::new(),
                    next_id: 0,
                }),
                capacity,
                version,
            }),
        }
    }

    /// Append one item, waiting until the buffer can take it.
    ///
    /// The wait ends as soon as the front item has been consumed by every
    /// live subscriber (or there are none), at which point it is evicted.
    pub async fn push(&self, item: T) {
        let mut rx = self.inner.version.subscribe();
        let mut item = Some(item);
        loop {
            rx.borrow_and_update();
            {
                let mut state = self.inner.state.lock().unwrap();
                if state.items.len() < self.inner.capacity {
                    state.items.push_back(item.take().unwrap());
                    drop(state);
                    self.inner.touch();
                    return;
                }
                let front_consumed = state
                    .cursors
                    .values()
                    .all(|&cursor| cursor > state.base);
                if front_consumed {
                    state.items.pop_front();
                    state.base += 1;
                    state.items.push_back(item.take().unwrap());
                    drop(state);
                    self.inner.touch();
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Mark the sequence complete.
    pub fn close(&self) {
        self.inner.state.lock().unwrap().closed = true;
        self.inner.touch();
    }

    /// Mark the sequence failed; subscribers observe the error in place of
    /// further items.
    pub fn fail(&self, error: RpcError) {
        let mut state = self.inner.state.lock().unwrap();
        state.failed = Some(error);
        state.closed = true;
        drop(state);
        self.inner.touch();
    }

    /// Whether a new subscriber would still see the sequence from position
    /// zero.
    pub fn safe_for_new_subscriber(&self) -> bool {
        self.inner.state.lock().unwrap().base == 0
    }

    /// Open a cursor at position zero, or `None` if the start of the
    /// sequence has already been evicted.
    pub fn subscribe(&self) -> Option<ReplaySubscriber<T>> {
        let mut state = self.inner.state.lock().unwrap();
        if state.base != 0 {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.cursors.insert(id, 0);
        let epoch = state.epoch;
        drop(state);
        Some(ReplaySubscriber {
            inner: self.inner.clone(),
            id,
            epoch,
        })
    }

    /// Invalidate every current subscriber.
    ///
    /// Their next read returns [`ReplayError::Invalidated`] and they stop
    /// constraining eviction.
    pub fn invalidate_subscribers(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.epoch += 1;
        state.cursors.clear();
        drop(state);
        self.inner.touch();
    }
}

/// One attempt's cursor into the replay buffer.
pub struct ReplaySubscriber<T> {
    inner: Arc<Inner<T>>,
    id: u64,
    epoch: u64,
}

impl<T: Clone> ReplaySubscriber<T> {
    /// The next item, `Ok(None)` at the end of a completed sequence.
    pub async fn next(&mut self) -> Result<Option<T>, ReplayError> {
        let mut rx = self.inner.version.subscribe();
        loop {
            rx.borrow_and_update();
            {
                let mut state = self.inner.state.lock().unwrap();
                if state.epoch != self.epoch {
                    return Err(ReplayError::Invalidated);
                }
                let cursor = *state.cursors.get(&self.id).expect("live cursor");
                let index = (cursor - state.base) as usize;
                if index < state.items.len() {
                    let item = state.items[index].clone();
                    state.cursors.insert(self.id, cursor + 1);
                    drop(state);
                    self.inner.touch();
                    return Ok(Some(item));
                }
                if let Some(error) = &state.failed {
                    return Err(ReplayError::Failed(error.clone()));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            if rx.changed().await.is_err() {
                return Err(ReplayError::Invalidated);
            }
        }
    }
}

impl<T> Drop for ReplaySubscriber<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        state.cursors.remove(&self.id);
        drop(state);
        self.inner.touch();
    }
}
