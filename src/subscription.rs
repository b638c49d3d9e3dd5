use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::{Connection, WeakConnection};
use crate::error::StompError;
use crate::event::{Dispatch, FrameEvent, FrameObserver};
use crate::frame::{Command, Frame, headers};
use crate::message::{Message, MessageFactory};

/// Allocate a process-unique subscription id.
pub fn next_subscription_id() -> String {
    static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("sub-{}", SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Message>,
    /// Recently seen message ids, oldest first
    seen: VecDeque<String>,
    seen_index: HashSet<String>,
    frame_count: u64,
    message_count: u64,
}

/// A live subscription to one or more destinations.
///
/// Messages routed to the subscription are deduplicated by `message-id`
/// against a bounded window of recently seen ids and queued until consumed.
/// Consumption is safe from any number of tasks.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destinations: Vec<String>,
    seen_capacity: usize,
    state: Mutex<State>,
    notify: Notify,
    closed: AtomicBool,
    /// Set once the broker has acknowledged SUBSCRIBE
    confirmed: AtomicBool,
}

impl Subscription {
    pub fn new(id: impl Into<String>, destinations: Vec<String>, seen_capacity: usize) -> Self {
        Self {
            id: id.into(),
            destinations,
            seen_capacity,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            confirmed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// MESSAGE frames routed here, duplicates included.
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frame_count
    }

    /// Distinct messages accepted into the queue.
    pub fn message_count(&self) -> u64 {
        self.state.lock().message_count
    }

    /// Messages waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether the subscription has been removed from its registry.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the broker has acknowledged the SUBSCRIBE.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub(crate) fn confirm(&self) {
        self.confirmed.store(true, Ordering::SeqCst);
    }

    /// Offer a message. Duplicates of a recently seen `message-id` are
    /// counted as frames but not queued.
    pub fn put(&self, message: Message) {
        {
            let mut state = self.state.lock();
            state.frame_count += 1;
            let mid = message.message_id();
            if state.seen_index.contains(mid) {
                debug!(subscription = %self.id, message_id = mid, "duplicate message dropped");
                return;
            }
            state.message_count += 1;
            if self.seen_capacity > 0 {
                if state.seen.len() >= self.seen_capacity {
                    if let Some(oldest) = state.seen.pop_front() {
                        state.seen_index.remove(&oldest);
                    }
                }
                state.seen.push_back(mid.to_string());
                state.seen_index.insert(mid.to_string());
            }
            state.queue.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Drain every queued message.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Take the oldest queued message without waiting.
    pub fn try_next(&self) -> Option<Message> {
        self.state.lock().queue.pop_front()
    }

    /// Wait until at least one message is queued. Returns `false` on timeout
    /// or when the subscription is closed with nothing queued.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(Some(Instant::now() + timeout), |sub| {
            (!sub.state.lock().queue.is_empty()).then_some(())
        })
        .await
        .is_some()
    }

    /// Take the next message, waiting up to `timeout` for one to arrive.
    pub async fn next(&self, timeout: Duration) -> Option<Message> {
        self.wait_for(Some(Instant::now() + timeout), Subscription::try_next)
            .await
    }

    async fn wait_for<T>(
        &self,
        deadline: Option<Instant>,
        check: impl Fn(&Self) -> Option<T>,
    ) -> Option<T> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(value) = check(self) {
                return Some(value);
            }
            if self.is_closed() {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return check(self);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Messages as an async stream. Ends once the subscription is closed and
    /// its queue drained.
    pub fn stream(self: &Arc<Self>) -> impl Stream<Item = Message> + Send + use<> {
        futures::stream::unfold(self.clone(), |sub| async move {
            let message = sub.wait_for(None, Subscription::try_next).await?;
            Some((message, sub))
        })
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// The subscriptions of one session.
///
/// Registered as an observer on the connection, it claims MESSAGE frames,
/// turns them into `Message`s and routes them by their `subscription` header.
pub struct SubscriptionRegistry {
    connection: WeakConnection,
    factory: MessageFactory,
    seen_capacity: usize,
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.subscriptions.read().len())
            .field("seen_capacity", &self.seen_capacity)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(
        connection: WeakConnection,
        factory: Option<MessageFactory>,
        seen_capacity: usize,
    ) -> Self {
        Self {
            connection,
            factory: factory.unwrap_or_else(|| Arc::new(Message::from_frame) as MessageFactory),
            seen_capacity,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscription.
    pub fn add(
        &self,
        id: impl Into<String>,
        destinations: Vec<String>,
    ) -> Result<Arc<Subscription>, StompError> {
        let id = id.into();
        let mut subs = self.subscriptions.write();
        if subs.contains_key(&id) {
            return Err(StompError::DuplicateSubscription(id));
        }
        let sub = Arc::new(Subscription::new(id.clone(), destinations, self.seen_capacity));
        subs.insert(id, sub.clone());
        Ok(sub)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(id).cloned()
    }

    /// Remove and close a subscription without telling the broker.
    pub fn remove(&self, id: &str) -> Option<Arc<Subscription>> {
        let sub = self.subscriptions.write().remove(id);
        if let Some(sub) = &sub {
            sub.close();
        }
        sub
    }

    /// Confirmed subscriptions. A subscription still waiting for its
    /// SUBSCRIBE receipt is routed to but not listed.
    pub fn list(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.is_confirmed())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Remove a subscription and send UNSUBSCRIBE for it, waiting for the
    /// broker's receipt. Unknown ids are ignored.
    pub async fn destroy(&self, id: &str) -> Result<(), StompError> {
        if self.remove(id).is_none() {
            return Ok(());
        }
        let conn = self.connection()?;
        let frame = Frame::new(Command::Unsubscribe)
            .header(headers::ID, id)
            .with_receipt();
        conn.send_frame(frame).await?;
        debug!(subscription = id, "unsubscribed");
        Ok(())
    }

    fn connection(&self) -> Result<Connection, StompError> {
        self.connection
            .upgrade()
            .ok_or_else(|| StompError::ConnectionClosed("connection dropped".to_string()))
    }

    fn route(&self, frame: &Frame) -> Dispatch {
        let Some(conn) = self.connection.upgrade() else {
            return Dispatch::Continue;
        };
        let message = match (self.factory)(&conn, frame.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!("unroutable MESSAGE: {}", e);
                return Dispatch::Continue;
            }
        };
        match self.get(message.subscription()) {
            Some(sub) => {
                sub.put(message);
                Dispatch::Discard
            }
            None => {
                warn!(
                    subscription = message.subscription(),
                    "MESSAGE for unknown subscription"
                );
                Dispatch::Continue
            }
        }
    }
}

impl FrameObserver for SubscriptionRegistry {
    fn notify(&self, event: FrameEvent, frame: &Frame) -> Dispatch {
        if event == FrameEvent::Received && frame.is_message() {
            self.route(frame)
        } else {
            Dispatch::Continue
        }
    }
}
