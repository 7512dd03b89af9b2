//! Event fan-out to subscribers.
//!
//! The dispatcher drops redelivered events by id, applies the per-conversation
//! sequence ordering within a decoded batch, hands each event to every live
//! subscriber and then advances the shared [`StreamCursor`].
//!
//! Delivery is synchronous and runs under a gate. [`EventDispatcher::stop`]
//! and [`EventDispatcher::unsubscribe`] take the same gate, so once either
//! returns the affected callbacks cannot fire again. Called from inside a
//! handler they skip the gate and only flip the flag that the delivery loop
//! checks before every callback.

use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::controller::{NoticeSink, StreamNotice};
use crate::stream::event::{Event, EventKind};

/// Return type of subscriber callbacks. An `Err` is logged and counted.
pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

type Callback = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Process-unique subscription id, shown as `sub-N`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Token returned by the `subscribe*` calls, used to unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    /// Id reported in [`StreamNotice::HandlerFailed`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Resume position: the last event handed to every subscriber.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamCursor {
    pub last_seen_event_id: Option<String>,
    pub last_seen_timestamp_ms: u64,
}

/// Read-only view of the cursor for other components.
#[derive(Clone, Debug, Default)]
pub struct CursorReader {
    cursor: Arc<RwLock<StreamCursor>>,
}

impl CursorReader {
    /// Copy of the cursor as of the last fully delivered event.
    pub fn snapshot(&self) -> StreamCursor {
        self.cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Running totals kept by the dispatcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub handler_failures: u64,
}

enum Sink {
    Callback {
        kind: Option<EventKind>,
        callback: Callback,
    },
    Channel(mpsc::UnboundedSender<Event>),
}

struct Subscriber {
    id: SubscriptionId,
    active: AtomicBool,
    sink: Sink,
}

/// Rolling set of the most recent event ids.
#[derive(Debug)]
struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    /// Records `event_id`, evicting the oldest id when the window is full.
    fn insert(&mut self, event_id: &str) {
        if self.contains(event_id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(event_id.to_string());
        self.seen.insert(event_id.to_string());
    }
}

struct Shared {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    gate: Mutex<()>,
    delivering: Mutex<Option<ThreadId>>,
    dedup: Mutex<DedupWindow>,
    cursor: Arc<RwLock<StreamCursor>>,
    stats: Mutex<DispatchStats>,
    notices: Option<NoticeSink>,
}

/// Cloneable handle to one dispatcher; clones share subscribers and state.
#[derive(Clone)]
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    /// Creates a stopped dispatcher remembering the last `dedup_window` ids.
    pub fn new(dedup_window: usize) -> Self {
        Self::build(dedup_window, None)
    }

    /// Creates a dispatcher that reports subscriber failures on `notices`.
    pub fn with_notices(dedup_window: usize, notices: NoticeSink) -> Self {
        Self::build(dedup_window, Some(notices))
    }

    fn build(dedup_window: usize, notices: Option<NoticeSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                gate: Mutex::new(()),
                delivering: Mutex::new(None),
                dedup: Mutex::new(DedupWindow::new(dedup_window)),
                cursor: Arc::new(RwLock::new(StreamCursor::default())),
                stats: Mutex::new(DispatchStats::default()),
                notices,
            }),
        }
    }

    /// Registers a callback for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Sink::Callback {
            kind: None,
            callback: Arc::new(handler),
        })
    }

    /// Registers a callback for one event kind only.
    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Sink::Callback {
            kind: Some(kind),
            callback: Arc::new(handler),
        })
    }

    /// Registers a queue consumer. The subscription ends when the receiver is
    /// dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(Sink::Channel(tx)), rx)
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut subscribers = write(&self.shared.subscribers);
            let position = subscribers.iter().position(|sub| sub.id == handle.id);
            position.map(|index| subscribers.remove(index))
        };
        let Some(subscriber) = removed else {
            return false;
        };
        subscriber.active.store(false, Ordering::SeqCst);
        self.wait_for_delivery();
        true
    }

    /// Enables delivery. Subscriptions made while stopped are kept.
    pub fn start(&self) {
        self.shared.running.store(true, Ordering::SeqCst);
    }

    /// Stops delivery. No callback runs after this returns.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.wait_for_delivery();
    }

    /// Whether [`EventDispatcher::dispatch_batch`] currently delivers.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Read handle on the resume position, shared with the supervisor.
    pub fn cursor(&self) -> CursorReader {
        CursorReader {
            cursor: Arc::clone(&self.shared.cursor),
        }
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> DispatchStats {
        *lock(&self.shared.stats)
    }

    /// Delivers one decoded batch and returns how many events were handed out.
    ///
    /// Arrival order is kept, except that events of one conversation carrying
    /// a sequence hint are delivered in ascending hint order.
    pub fn dispatch_batch(&self, events: Vec<Event>) -> usize {
        if events.is_empty() || !self.is_running() {
            return 0;
        }

        let _gate = lock(&self.shared.gate);
        *lock(&self.shared.delivering) = Some(thread::current().id());
        let delivered = self.deliver(order_batch(events));
        *lock(&self.shared.delivering) = None;
        delivered
    }

    /// Runs under the gate, so checking the window and committing to it after
    /// the subscribers ran cannot interleave with another delivery.
    fn deliver(&self, events: Vec<Event>) -> usize {
        let mut delivered = 0;
        for event in events {
            if !self.is_running() {
                break;
            }
            if lock(&self.shared.dedup).contains(event.event_id()) {
                lock(&self.shared.stats).duplicates += 1;
                debug!(event = "duplicate_event_dropped", event_id = %event.event_id());
                continue;
            }

            let subscribers = read(&self.shared.subscribers).clone();
            for subscriber in &subscribers {
                if !self.is_running() {
                    // Not committed: a redelivery after restart reaches the
                    // subscribers that missed it.
                    debug!(event = "delivery_interrupted", event_id = %event.event_id());
                    return delivered;
                }
                if subscriber.active.load(Ordering::SeqCst) {
                    self.deliver_to(subscriber, &event);
                }
            }

            lock(&self.shared.dedup).insert(event.event_id());
            let mut cursor = write(&self.shared.cursor);
            cursor.last_seen_event_id = Some(event.event_id().to_string());
            cursor.last_seen_timestamp_ms = cursor
                .last_seen_timestamp_ms
                .max(event.header().timestamp_ms);
            drop(cursor);

            lock(&self.shared.stats).delivered += 1;
            delivered += 1;
        }
        delivered
    }

    fn deliver_to(&self, subscriber: &Subscriber, event: &Event) {
        match &subscriber.sink {
            Sink::Callback { kind, callback } => {
                if kind.is_some_and(|kind| kind != event.kind()) {
                    return;
                }
                let failure = match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => err.to_string(),
                    Err(_) => "handler panicked".to_string(),
                };
                self.record_failure(subscriber.id, &failure);
            }
            Sink::Channel(tx) => {
                if tx.send(event.clone()).is_err() {
                    subscriber.active.store(false, Ordering::SeqCst);
                    write(&self.shared.subscribers).retain(|sub| sub.id != subscriber.id);
                    debug!(event = "channel_subscriber_closed", subscription = %subscriber.id);
                }
            }
        }
    }

    fn record_failure(&self, subscription: SubscriptionId, failure: &str) {
        let total = {
            let mut stats = lock(&self.shared.stats);
            stats.handler_failures += 1;
            stats.handler_failures
        };
        warn!(
            event = "subscriber_failed",
            subscription = %subscription,
            total,
            error = failure
        );
        if let Some(notices) = &self.shared.notices {
            notices.send(StreamNotice::HandlerFailed {
                subscription,
                total,
            });
        }
    }

    fn register(&self, sink: Sink) -> SubscriptionHandle {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.shared.subscribers).push(Arc::new(Subscriber {
            id,
            active: AtomicBool::new(true),
            sink,
        }));
        SubscriptionHandle { id }
    }

    /// Blocks until an in-flight delivery on another thread has finished.
    fn wait_for_delivery(&self) {
        if *lock(&self.shared.delivering) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.shared.gate));
    }
}

/// Sorts same-conversation events with sequence hints by hint, leaving every
/// other event in its arrival slot.
fn order_batch(events: Vec<Event>) -> Vec<Event> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        if let (Some(conversation), Some(_)) =
            (event.conversation_id(), event.header().sequence_hint)
        {
            groups
                .entry(conversation.to_string())
                .or_default()
                .push(index);
        }
    }
    if groups.values().all(|slots| slots.len() < 2) {
        return events;
    }

    let mut slots: Vec<Option<Event>> = events.into_iter().map(Some).collect();
    for positions in groups.values().filter(|slots| slots.len() > 1) {
        let mut group: Vec<Event> = positions
            .iter()
            .filter_map(|&index| slots[index].take())
            .collect();
        group.sort_by_key(|event| event.header().sequence_hint);
        for (&index, event) in positions.iter().zip(group) {
            slots[index] = Some(event);
        }
    }
    slots.into_iter().flatten().collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
