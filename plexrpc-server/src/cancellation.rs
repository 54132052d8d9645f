//! Per-RPC cancellation.
//!
//! Every inbound RPC is bound to an [`RpcCancellationHandle`]. Handlers can
//! poll it, await it, or register scoped on-cancel callbacks; transports
//! cancel it through out-of-band [`StreamEvent`]s when the peer goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Identifier of a registered on-cancel handler, for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type CancelHandler = Box<dyn FnOnce() + Send>;

struct HandleInner {
    handlers: Mutex<HandlerTable>,
    flag: watch::Sender<bool>,
}

struct HandlerTable {
    entries: HashMap<u64, CancelHandler>,
    next_id: u64,
}

/// The cancellation handle carried in each RPC's server context.
///
/// Clones share state. [`cancel`](RpcCancellationHandle::cancel) is
/// idempotent: registered handlers fire exactly once, on the first call.
#[derive(Clone)]
pub struct RpcCancellationHandle {
    inner: Arc<HandleInner>,
}

impl Default for RpcCancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCancellationHandle {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                handlers: Mutex::new(HandlerTable {
                    entries: HashMap::new(),
                    next_id: 0,
                }),
                flag,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.flag.borrow()
    }

    /// Suspend until the RPC is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.flag.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Cancel the RPC. The first call fires every registered handler;
    /// later calls are no-ops.
    pub fn cancel(&self) {
        let fired = {
            let mut table = self.inner.handlers.lock().unwrap();
            if *self.inner.flag.borrow() {
                return;
            }
            let _ = self.inner.flag.send(true);
            std::mem::take(&mut table.entries)
        };
        // Run the handlers outside the lock; one of them may touch this
        // handle again.
        for (_, handler) in fired {
            handler();
        }
    }

    /// Register an on-cancel callback.
    ///
    /// If the RPC is already cancelled the callback runs immediately.
    pub fn add_handler(&self, handler: impl FnOnce() + Send + 'static) -> HandlerId {
        let mut table = self.inner.handlers.lock().unwrap();
        let id = table.next_id;
        table.next_id += 1;
        if *self.inner.flag.borrow() {
            drop(table);
            handler();
        } else {
            table.entries.insert(id, Box::new(handler));
        }
        HandlerId(id)
    }

    /// Remove a registered callback. Removing a handler that already fired
    /// or was never registered does nothing.
    pub fn remove_handler(&self, id: HandlerId) {
        self.inner.handlers.lock().unwrap().entries.remove(&id.0);
    }
}

impl std::fmt::Debug for RpcCancellationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcCancellationHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Out-of-band events a transport reports for one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The peer cancelled the RPC.
    RpcCancelled,
}

struct EventsInner {
    state: Mutex<EventsState>,
}

struct EventsState {
    observed: Vec<StreamEvent>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<StreamEvent>>,
    next_id: u64,
}

/// The emitting side of a stream's event sequence, held by the transport.
///
/// Each event is delivered at most once to every current subscriber; a
/// subscriber arriving late immediately receives the events already
/// observed.
#[derive(Clone)]
pub struct StreamEventSource {
    inner: Arc<EventsInner>,
}

impl Default for StreamEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEventSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventsInner {
                state: Mutex::new(EventsState {
                    observed: Vec::new(),
                    subscribers: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Record an event and deliver it to every current subscriber.
    ///
    /// An event that was already observed is not re-delivered.
    pub fn emit(&self, event: StreamEvent) {
        let mut state = self.inner.state.lock().unwrap();
        if state.observed.contains(&event) {
            return;
        }
        state.observed.push(event);
        state.subscribers.retain(|_, tx| tx.send(event).is_ok());
    }

    /// Subscribe to the event sequence, catching up on past events first.
    pub fn subscribe(&self) -> StreamEventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().unwrap();
        for event in &state.observed {
            let _ = tx.send(*event);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);
        StreamEventSubscription {
            rx,
            id,
            inner: self.inner.clone(),
        }
    }
}

/// One subscriber's view of a stream's events.
pub struct StreamEventSubscription {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    id: u64,
    inner: Arc<EventsInner>,
}

impl StreamEventSubscription {
    /// The next event. Pends until one arrives.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for StreamEventSubscription {
    fn drop(&mut self) {
        self.inner
            .state
            .lock()
            .unwrap()
            .subscribers
            .remove(&self.id);
    }
}

/// Cancel `handle` as soon as the transport reports the RPC cancelled.
pub fn bind_cancellation(
    handle: RpcCancellationHandle,
    mut events: StreamEventSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::RpcCancelled => {
                    handle.cancel();
                    break;
                }
            }
        }
    })
}
