//! Live store subscriptions with an explicit teardown contract.
//!
//! Every distinct [`QueryDescriptor`] is backed by at most one store
//! subscription (a channel), no matter how many consumers listen to it. The
//! channel folds store deltas into an ordered result set and hands each
//! listener the full snapshot, in store delivery order.
//!
//! A listener's callback sits behind a gate. Unsubscribing closes the gate
//! while holding it, so once [`SubscriptionHandle::unsubscribe`] returns the
//! callback is never invoked again, even if a delta was in flight.

use crate::{
    config::RetryPolicy,
    error::{EngineError, Result},
};
use feedsync_store::{
    client::{ContentStore, StoreEvent, StoreSubscription},
    document::{Change, Document, apply_changes},
    query::QueryDescriptor,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The ordered result set of a query, plus the changes that produced it.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Snapshot {
    pub documents: Arc<Vec<Document>>,
    pub changes: Vec<Change>,
}

#[derive(Clone, PartialEq, Debug)]
pub enum SubscriptionEvent {
    Snapshot(Snapshot),
    /// The store connection dropped. Delivered once per drop; the last
    /// snapshot stays valid as a stale view.
    ConnectionLost(String),
}

type Callback = Box<dyn FnMut(SubscriptionEvent) + Send>;
type Registry = Mutex<HashMap<QueryDescriptor, Arc<Channel>>>;

struct ManagerInner {
    store: Arc<dyn ContentStore>,
    retry: RetryPolicy,
    channels: Arc<Registry>,
    next_id: AtomicU64,
}

/// Opens and multiplexes store subscriptions.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

struct Channel {
    descriptor: QueryDescriptor,
    state: Mutex<ChannelState>,
    cancel: CancellationToken,
    retired: AtomicBool,
}

#[derive(Default)]
struct ChannelState {
    documents: Arc<Vec<Document>>,
    listeners: Vec<Arc<Listener>>,
    /// Why the connection dropped, until it is restored.
    lost: Option<String>,
    closed: bool,
}

struct Listener {
    id: u64,
    callback: Mutex<Option<Callback>>,
}

/// Owned handle to one listener. Clones refer to the same listener.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    listener: Arc<Listener>,
    channel: Arc<Channel>,
    channels: Arc<Registry>,
    closed: AtomicBool,
}

/// One logical consumer, such as a view. Holds at most one subscription per
/// descriptor and tears all of them down when closed or dropped.
pub struct Consumer {
    manager: SubscriptionManager,
    handles: Mutex<HashMap<QueryDescriptor, SubscriptionHandle>>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                retry,
                channels: Arc::new(Mutex::new(HashMap::new())),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn consumer(&self) -> Consumer {
        Consumer {
            manager: self.clone(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Number of store subscriptions currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Adds a listener for `descriptor`.
    ///
    /// `on_event` receives the current full result before this returns, then
    /// every later snapshot. It must not unsubscribe its own handle.
    pub async fn subscribe<F>(
        &self,
        descriptor: QueryDescriptor,
        on_event: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            id,
            callback: Mutex::new(Some(Box::new(on_event))),
        });

        loop {
            let existing = self.inner.channels.lock().get(&descriptor).cloned();
            let channel = match existing {
                Some(channel) => channel,
                None => self.open(&descriptor).await?,
            };
            if channel.attach(&listener) {
                return Ok(SubscriptionHandle {
                    inner: Arc::new(HandleInner {
                        listener,
                        channel,
                        channels: self.inner.channels.clone(),
                        closed: AtomicBool::new(false),
                    }),
                });
            }
        }
    }

    async fn open(&self, descriptor: &QueryDescriptor) -> Result<Arc<Channel>> {
        let subscription = self
            .inner
            .store
            .subscribe(descriptor)
            .await
            .map_err(|err| {
                warn!(descriptor = %descriptor, error = %err, "Opening subscription failed");
                EngineError::ConnectionLost(err.to_string())
            })?;
        let StoreSubscription { initial, events } = subscription;

        let mut channels = self.inner.channels.lock();
        if let Some(channel) = channels.get(descriptor) {
            // Lost a race against another subscriber; ours is dropped here.
            return Ok(channel.clone());
        }

        let mut documents = initial;
        descriptor.sort(&mut documents);
        let channel = Arc::new(Channel {
            descriptor: descriptor.clone(),
            state: Mutex::new(ChannelState {
                documents: Arc::new(documents),
                ..ChannelState::default()
            }),
            cancel: CancellationToken::new(),
            retired: AtomicBool::new(false),
        });
        channels.insert(descriptor.clone(), channel.clone());
        drop(channels);

        debug!(descriptor = %descriptor, "Opened subscription");
        tokio::spawn(pump(self.inner.clone(), channel.clone(), events));

        Ok(channel)
    }
}

impl Debug for SubscriptionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("retry", &self.inner.retry)
            .field("open_channels", &self.open_channels())
            .finish_non_exhaustive()
    }
}

/// Forwards store events of one channel to its listeners until cancelled.
async fn pump(
    manager: Arc<ManagerInner>,
    channel: Arc<Channel>,
    mut events: UnboundedReceiver<StoreEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = channel.cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Some(StoreEvent::Changes(changes)) => channel.apply(changes),
            Some(StoreEvent::Disconnected { reason }) => channel.connection_lost(&reason),
            None => channel.connection_lost("the store closed the subscription"),
        }
        if !channel.is_connection_lost() {
            continue;
        }

        if !manager.retry.retry {
            channel.retire(&manager.channels);
            return;
        }
        match reopen(&manager, &channel).await {
            Some(reopened) => events = reopened,
            None => return,
        }
    }
}

/// Re-subscribes after the backoff until the store answers or the channel is
/// cancelled.
async fn reopen(
    manager: &ManagerInner,
    channel: &Channel,
) -> Option<UnboundedReceiver<StoreEvent>> {
    loop {
        tokio::select! {
            biased;
            () = channel.cancel.cancelled() => return None,
            () = tokio::time::sleep(manager.retry.backoff.to_std()) => {}
        }

        match manager.store.subscribe(&channel.descriptor).await {
            Ok(StoreSubscription { initial, events }) => {
                debug!(descriptor = %channel.descriptor, "Subscription restored");
                channel.reset(initial);
                return Some(events);
            }
            Err(err) => {
                debug!(descriptor = %channel.descriptor, error = %err, "Retrying subscription");
            }
        }
    }
}

impl Channel {
    /// Registers `listener` and hands it the current result.
    ///
    /// Returns false if the channel was closed in the meantime.
    fn attach(&self, listener: &Arc<Listener>) -> bool {
        // Holding the gate keeps the pump from delivering newer snapshots to
        // this listener before it saw the initial one.
        let mut gate = listener.callback.lock();
        let (documents, lost) = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.listeners.push(listener.clone());
            (state.documents.clone(), state.lost.clone())
        };

        if let Some(callback) = gate.as_mut() {
            let changes = documents.iter().cloned().map(Change::added).collect();
            callback(SubscriptionEvent::Snapshot(Snapshot { documents, changes }));
            // Joined after the drop was announced to the others.
            if let Some(reason) = lost {
                callback(SubscriptionEvent::ConnectionLost(reason));
            }
        }
        true
    }

    fn apply(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }

        let (snapshot, listeners) = {
            let mut state = self.state.lock();
            let mut documents = state.documents.as_ref().clone();
            apply_changes(&mut documents, &changes);
            self.descriptor.sort(&mut documents);
            state.documents = Arc::new(documents);
            let snapshot = Snapshot {
                documents: state.documents.clone(),
                changes,
            };
            (snapshot, state.listeners.clone())
        };

        deliver(&listeners, &SubscriptionEvent::Snapshot(snapshot));
    }

    fn reset(&self, initial: Vec<Document>) {
        let (snapshot, listeners) = {
            let mut state = self.state.lock();
            let mut documents = initial;
            self.descriptor.sort(&mut documents);
            state.documents = Arc::new(documents);
            state.lost = None;
            let changes = state.documents.iter().cloned().map(Change::added).collect();
            let snapshot = Snapshot {
                documents: state.documents.clone(),
                changes,
            };
            (snapshot, state.listeners.clone())
        };

        deliver(&listeners, &SubscriptionEvent::Snapshot(snapshot));
    }

    fn connection_lost(&self, reason: &str) {
        let listeners = {
            let mut state = self.state.lock();
            if state.lost.is_some() {
                return;
            }
            state.lost = Some(reason.to_owned());
            state.listeners.clone()
        };

        warn!(descriptor = %self.descriptor, reason, "Subscription lost its connection");
        deliver(&listeners, &SubscriptionEvent::ConnectionLost(reason.to_owned()));
    }

    fn is_connection_lost(&self) -> bool {
        self.state.lock().lost.is_some()
    }

    /// Stops routing new subscribers to this channel. Existing listeners keep
    /// their last snapshot.
    fn retire(self: &Arc<Self>, channels: &Registry) {
        self.retired.store(true, Ordering::Release);
        let mut channels = channels.lock();
        if channels
            .get(&self.descriptor)
            .is_some_and(|channel| Arc::ptr_eq(channel, self))
        {
            channels.remove(&self.descriptor);
        }
    }

    fn detach(self: &Arc<Self>, listener_id: u64, channels: &Registry) {
        let mut channels = channels.lock();
        let mut state = self.state.lock();
        state.listeners.retain(|listener| listener.id != listener_id);
        if !state.listeners.is_empty() || state.closed {
            return;
        }

        state.closed = true;
        drop(state);
        if channels
            .get(&self.descriptor)
            .is_some_and(|channel| Arc::ptr_eq(channel, self))
        {
            channels.remove(&self.descriptor);
        }
        drop(channels);

        self.cancel.cancel();
        debug!(descriptor = %self.descriptor, "Closed subscription");
    }
}

fn deliver(listeners: &[Arc<Listener>], event: &SubscriptionEvent) {
    for listener in listeners {
        if let Some(callback) = listener.callback.lock().as_mut() {
            callback(event.clone());
        }
    }
}

impl SubscriptionHandle {
    /// Stops delivery to this listener. Idempotent.
    ///
    /// Blocks until a callback that is running right now has returned, so it
    /// must not be called from inside the listener's own callback.
    pub fn unsubscribe(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner
            .channel
            .detach(self.inner.listener.id, &self.inner.channels);
        self.inner.listener.callback.lock().take();
    }

    /// False once unsubscribed, or once the connection was lost for good.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
            && !self.inner.channel.retired.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.inner.channel.descriptor
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SubscriptionHandle {}

impl Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("listener", &self.inner.listener.id)
            .field("descriptor", self.descriptor())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Consumer {
    /// Subscribes to `descriptor` unless this consumer already has an active
    /// subscription for it, in which case the existing handle is returned and
    /// `on_event` is dropped unused.
    pub async fn subscribe<F>(
        &self,
        descriptor: QueryDescriptor,
        on_event: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        if let Some(handle) = self.active_handle(&descriptor) {
            return Ok(handle);
        }

        let handle = self.manager.subscribe(descriptor.clone(), on_event).await?;

        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&descriptor).filter(|handle| handle.is_active()) {
            let existing = existing.clone();
            drop(handles);
            handle.unsubscribe();
            return Ok(existing);
        }
        let replaced = handles.insert(descriptor, handle.clone());
        drop(handles);
        if let Some(replaced) = replaced {
            replaced.unsubscribe();
        }
        Ok(handle)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.unsubscribe();
        let mut handles = self.handles.lock();
        if handles.get(handle.descriptor()) == Some(handle) {
            handles.remove(handle.descriptor());
        }
    }

    /// Tears down every subscription of this consumer.
    pub fn close(&self) {
        let handles: Vec<_> = self.handles.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.unsubscribe();
        }
    }

    fn active_handle(&self, descriptor: &QueryDescriptor) -> Option<SubscriptionHandle> {
        self.handles
            .lock()
            .get(descriptor)
            .filter(|handle| handle.is_active())
            .cloned()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for Consumer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("subscriptions", &self.handles.lock().len())
            .finish_non_exhaustive()
    }
}
