use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use courier_types::events::{ChatEvent, ClientAction};
use courier_types::models::{MessageId, Notification, NotificationId, UserId};

use crate::config::RelayConfig;
use crate::socket;

/// Lifecycle of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Handle to the relay connection manager. Cloning is cheap; every clone
/// shares one link, one outbound queue and one set of subscribers.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: RelayConfig,

    /// Current link state, observable through `watch_state`.
    state_tx: watch::Sender<LinkState>,

    /// Intentionally-closed flag. While true the driver neither reconnects
    /// nor keeps the socket alive.
    shutdown_tx: watch::Sender<bool>,

    /// Outbound FIFO. The driver drains it whenever the link is open;
    /// everything queued while closed goes out ahead of later sends.
    outbox: Mutex<VecDeque<ClientAction>>,
    outbox_wake: Notify,

    /// Subscribers by id. Fan-out prunes entries whose receiver was dropped.
    chat_subs: Mutex<HashMap<u64, mpsc::UnboundedSender<ChatEvent>>>,
    note_subs: Mutex<HashMap<u64, mpsc::UnboundedSender<Notification>>>,
    next_sub_id: AtomicU64,

    /// Reconnect attempts since the last successful open.
    attempts: AtomicU32,

    /// The driver task, if one was ever spawned.
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Closed);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config,
                state_tx,
                shutdown_tx,
                outbox: Mutex::new(VecDeque::new()),
                outbox_wake: Notify::new(),
                chat_subs: Mutex::new(HashMap::new()),
                note_subs: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Open the relay link. Idempotent while the link is live; called after
    /// a `disconnect` it replaces the winding-down driver and starts fresh.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let Some(url) = self.inner.config.relay_url.clone() else {
            error!("no relay URL configured, realtime messaging disabled");
            return;
        };

        let mut driver = self.inner.driver.lock().expect("driver lock poisoned");
        if let Some(task) = driver.as_ref().filter(|task| !task.is_finished()) {
            if !*self.inner.shutdown_tx.borrow() {
                debug!("connect ignored, link already {:?}", self.state());
                return;
            }
            // Still winding down after a disconnect; replace it instead of
            // waiting for it to notice.
            task.abort();
        }

        self.inner.shutdown_tx.send_replace(false);
        self.inner.attempts.store(0, Ordering::Relaxed);
        self.inner.state_tx.send_replace(LinkState::Connecting);
        *driver = Some(tokio::spawn(socket::run(self.inner.clone(), url)));
    }

    /// Close the relay link and stay closed until the next `connect`.
    /// Clears the outbound queue and drops every subscriber.
    pub fn disconnect(&self) {
        info!("closing relay link");
        self.inner.state_tx.send_replace(LinkState::Closing);
        self.inner.shutdown_tx.send_replace(true);
        self.inner.outbox_wake.notify_one();

        self.inner
            .outbox
            .lock()
            .expect("outbox lock poisoned")
            .clear();
        self.inner
            .chat_subs
            .lock()
            .expect("chat subscriber lock poisoned")
            .clear();
        self.inner
            .note_subs
            .lock()
            .expect("notification subscriber lock poisoned")
            .clear();

        // The driver exits without touching the state once the flag is set;
        // from the caller's side the client is closed right now.
        self.inner.state_tx.send_replace(LinkState::Closed);
    }

    /// Queue an action for the relay. Never fails: while the link is open the
    /// driver writes it out immediately, otherwise it waits in the FIFO for
    /// the next open.
    pub fn send(&self, action: ClientAction) {
        self.inner
            .outbox
            .lock()
            .expect("outbox lock poisoned")
            .push_back(action);
        self.inner.outbox_wake.notify_one();
    }

    /// Compose and queue a chat message. Returns the client key that the
    /// relay echoes back in the authoritative copy.
    pub fn send_chat_message(
        &self,
        recipient_id: UserId,
        content: impl Into<String>,
        media: Option<String>,
    ) -> Uuid {
        let client_key = Uuid::new_v4();
        self.send(ClientAction::SendMessage {
            recipient_id,
            content: content.into(),
            media,
            client_key,
        });
        client_key
    }

    pub fn send_typing(&self, recipient_id: UserId) {
        self.send(ClientAction::Typing { recipient_id });
    }

    pub fn send_stop_typing(&self, recipient_id: UserId) {
        self.send(ClientAction::StopTyping { recipient_id });
    }

    /// Acknowledge a message as read. Refused for local ids the relay has
    /// never seen.
    pub fn mark_message_read(&self, message_id: &MessageId) {
        if message_id.is_local() {
            debug!("not acking unconfirmed local message {}", message_id);
            return;
        }
        self.send(ClientAction::MarkRead {
            message_id: Some(message_id.clone()),
            notification_id: None,
        });
    }

    /// Acknowledge a message as delivered. Refused for local ids.
    pub fn mark_message_delivered(&self, message_id: &MessageId) {
        if message_id.is_local() {
            debug!("not acking unconfirmed local message {}", message_id);
            return;
        }
        self.send(ClientAction::MarkDelivered {
            message_id: message_id.clone(),
        });
    }

    pub fn mark_notification_read(&self, notification_id: NotificationId) {
        self.send(ClientAction::MarkRead {
            message_id: None,
            notification_id: Some(notification_id),
        });
    }

    /// Subscribe to chat events. Dropping the receiver unsubscribes.
    pub fn chat_events(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .chat_subs
            .lock()
            .expect("chat subscriber lock poisoned")
            .insert(id, tx);
        rx
    }

    /// Subscribe to notifications, heartbeat pongs included. Dropping the
    /// receiver unsubscribes.
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .note_subs
            .lock()
            .expect("notification subscriber lock poisoned")
            .insert(id, tx);
        rx
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Watch link state transitions.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state_tx.subscribe()
    }

    /// Actions waiting in the outbound queue.
    pub fn pending_sends(&self) -> usize {
        self.inner.outbox.lock().expect("outbox lock poisoned").len()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Relaxed)
    }
}

impl ClientInner {
    pub(crate) fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn store_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::Relaxed);
    }

    pub(crate) fn pop_action(&self) -> Option<ClientAction> {
        self.outbox.lock().expect("outbox lock poisoned").pop_front()
    }

    /// Put a failed write back where it came from so the retry keeps order.
    pub(crate) fn requeue_front(&self, action: ClientAction) {
        self.outbox
            .lock()
            .expect("outbox lock poisoned")
            .push_front(action);
    }

    pub(crate) fn outbox_wake(&self) -> &Notify {
        &self.outbox_wake
    }

    pub(crate) fn fan_out_chat(&self, event: ChatEvent) {
        let mut subs = self
            .chat_subs
            .lock()
            .expect("chat subscriber lock poisoned");
        subs.retain(|id, tx| {
            if tx.send(event.clone()).is_ok() {
                true
            } else {
                debug!("chat subscriber {} went away", id);
                false
            }
        });
    }

    pub(crate) fn fan_out_notification(&self, notification: Notification) {
        let mut subs = self
            .note_subs
            .lock()
            .expect("notification subscriber lock poisoned");
        subs.retain(|id, tx| {
            if tx.send(notification.clone()).is_ok() {
                true
            } else {
                debug!("notification subscriber {} went away", id);
                false
            }
        });
    }
}
