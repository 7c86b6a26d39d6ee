//! In-process fan-out of decoded [`ServerEvent`]s.
//!
//! [`EventChannel`] delivers every published event to every registered
//! subscriber independently. Subscribers come in two forms:
//!
//! - [`Subscription`] - a per-subscriber unbounded queue, drained with
//!   [`Subscription::recv`]. A slow or dropped receiver never holds up
//!   the others.
//! - callbacks registered with [`EventChannel::on`], invoked inline
//!   during [`EventChannel::publish`]. A callback returning `Err` or
//!   panicking is logged and delivery continues with the next
//!   subscriber.
//!
//! The subscriber list is snapshotted before delivery, so callbacks may
//! unsubscribe themselves (or anyone else) mid-delivery. Each subscriber
//! carries an `active` flag checked right before delivery, so a removed
//! subscriber never sees another event.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

use crate::messages::ServerEvent;

/// Callback form of a subscriber.
pub type EventCallback = dyn Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync;

/// Identifies one subscriber within its channel.
pub type SubscriberId = u64;

enum Sink {
    Queue(mpsc::UnboundedSender<ServerEvent>),
    Callback(Arc<EventCallback>),
}

struct Subscriber {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    sink: Arc<Sink>,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Every critical section leaves the list consistent, so a
        // poisoned lock is safe to reuse.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut registry = self.registry();
        let Some(pos) = registry.subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let subscriber = registry.subscribers.remove(pos);
        subscriber.active.store(false, Ordering::SeqCst);
        true
    }
}

/// Multi-subscriber publish hub for one job's event stream.
///
/// Cheap to clone; all clones share the same subscriber set.
#[derive(Clone, Default)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue subscriber.
    ///
    /// Subscribing to a closed channel yields a subscription whose
    /// [`recv`](Subscription::recv) immediately returns `None`.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id, active) = self.register(Sink::Queue(tx));
        Subscription {
            id,
            active,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a callback invoked for every published event.
    ///
    /// Returns the handle used to unsubscribe. Dropping the handle does
    /// **not** unsubscribe; callbacks live until [`Unsubscribe::unsubscribe`]
    /// or [`close`](Self::close).
    pub fn on<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let (id, _) = self.register(Sink::Callback(Arc::new(callback)));
        Unsubscribe {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Deliver `event` to every active subscriber, in registration order.
    ///
    /// Returns the number of subscribers the event reached. Publishing
    /// on a closed channel is a no-op.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        let targets: Vec<(SubscriberId, Arc<AtomicBool>, Arc<Sink>)> = {
            let registry = self.shared.registry();
            if registry.closed {
                return 0;
            }
            registry
                .subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.active), Arc::clone(&s.sink)))
                .collect()
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, active, sink) in targets {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            match sink.as_ref() {
                Sink::Queue(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        gone.push(id);
                    }
                }
                Sink::Callback(callback) => {
                    match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                        Ok(Ok(())) => delivered += 1,
                        Ok(Err(e)) => {
                            tracing::warn!(
                                subscriber = id,
                                event = event.kind(),
                                error = %e,
                                "Event subscriber failed",
                            );
                        }
                        Err(payload) => {
                            tracing::error!(
                                subscriber = id,
                                event = event.kind(),
                                panic = panic_message(payload.as_ref()),
                                "Event subscriber panicked",
                            );
                        }
                    }
                }
            }
        }

        for id in gone {
            self.shared.remove(id);
        }
        delivered
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry().closed
    }

    /// Detach every subscriber and refuse further publishes.
    ///
    /// Queue subscribers observe the end of their stream once buffered
    /// events are drained. Idempotent.
    pub fn close(&self) {
        let mut registry = self.shared.registry();
        registry.closed = true;
        for subscriber in registry.subscribers.drain(..) {
            subscriber.active.store(false, Ordering::SeqCst);
        }
    }

    fn register(&self, sink: Sink) -> (SubscriberId, Arc<AtomicBool>) {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.shared.registry();
        // Registering on a closed channel drops the sink straight away.
        let active = Arc::new(AtomicBool::new(!registry.closed));
        if !registry.closed {
            registry.subscribers.push(Subscriber {
                id,
                active: Arc::clone(&active),
                sink: Arc::new(sink),
            });
        }
        (id, active)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Receiving end of a queue subscriber.
///
/// Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription was removed or the channel
    /// closed and every buffered event was consumed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Return a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop receiving events and discard anything still buffered.
    pub fn unsubscribe(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
        self.active.store(false, Ordering::SeqCst);
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.id);
        }
    }
}

/// Handle returned by [`EventChannel::on`].
#[derive(Clone)]
pub struct Unsubscribe {
    id: SubscriberId,
    shared: Weak<Shared>,
}

impl Unsubscribe {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.remove(self.id))
            .unwrap_or(false)
    }
}
