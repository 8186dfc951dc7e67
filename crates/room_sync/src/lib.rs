//! Real-time conversation sync engine for the in-app chat.
//!
//! A [`RoomSession`] owns the canonical message store for one room and keeps
//! it live across the initial history snapshot, the websocket push channel,
//! optimistic local mutations and reconnects. The embedding UI reads cloned
//! projections through the accessors and reacts to [`SessionEvent`]s.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, RoomId, SenderRef, ViewerId},
    protocol::{
        AttachmentRecord, ClientFrame, EditMessageBody, MessageRecord, PinBody, PushFrame,
        ReactBody, SendMessageBody,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod classify;
pub mod connection;
pub mod error;
pub mod http_api;
pub mod reactions;
pub mod store;
pub mod transport;
pub mod typing;

pub use connection::{BackoffPolicy, ConnectionState};
pub use error::{MutationError, SnapshotError};
pub use http_api::{ChatBackend, HttpChatBackend};
pub use store::{ChatMessage, MessageStore, UpsertOutcome};
pub use transport::{PushConnector, PushSink, PushStream, WebSocketPushConnector};

use typing::{PresenceSet, SignalPlan, TypingSignaler};

/// One-way hook the surrounding application registers to bump unread
/// counts. Invoked only for genuinely new messages, never for echoes of
/// messages the client already displays.
pub trait BadgeSink: Send + Sync {
    fn message_arrived(&self, message: &MessageRecord);
}

pub struct NoopBadgeSink;

impl BadgeSink for NoopBadgeSink {
    fn message_arrived(&self, _message: &MessageRecord) {}
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessagesChanged,
    TypingChanged(Vec<String>),
    ConnectionChanged(ConnectionState),
    LastReadChanged(DateTime<Utc>),
    RoomPinChanged(bool),
    /// A rejected mutation, already rolled back; carries the user-facing
    /// detail for an inline, dismissible error.
    MutationFailed(String),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub room_id: RoomId,
    pub viewer: SenderRef,
    pub token: String,
    pub backoff: BackoffPolicy,
}

struct RoomInner {
    store: MessageStore,
    presence: PresenceSet,
    signaler: TypingSignaler,
    last_read_at: Option<DateTime<Utc>>,
    room_pinned: bool,
    connection: ConnectionState,
    sink: Option<Box<dyn PushSink>>,
    supervisor: Option<JoinHandle<()>>,
}

pub struct RoomSession {
    backend: Arc<dyn ChatBackend>,
    connector: Arc<dyn PushConnector>,
    badge: Arc<dyn BadgeSink>,
    options: SessionOptions,
    /// Monotonic tag for the live connection/room lifetime; any async
    /// callback that outlives a teardown sees a stale generation and becomes
    /// a no-op.
    generation: AtomicU64,
    inner: Mutex<RoomInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl RoomSession {
    /// Load the room snapshot, mark the room read and start the push-channel
    /// supervisor. Snapshot failure is page-level: without a baseline there
    /// is nothing to reconcile against.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn PushConnector>,
        badge: Arc<dyn BadgeSink>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SnapshotError> {
        let room_id = options.room_id;
        let (events, _) = broadcast::channel(1024);
        let session = Arc::new(Self {
            backend,
            connector,
            badge,
            generation: AtomicU64::new(0),
            inner: Mutex::new(RoomInner {
                store: MessageStore::new(options.viewer.viewer_id),
                presence: PresenceSet::default(),
                signaler: TypingSignaler::default(),
                last_read_at: None,
                room_pinned: false,
                connection: ConnectionState::Idle,
                sink: None,
                supervisor: None,
            }),
            events,
            options,
        });

        let snapshot = session
            .backend
            .fetch_snapshot(room_id)
            .await
            .map_err(|source| SnapshotError {
                room_id: room_id.0,
                source,
            })?;
        {
            let mut inner = session.inner.lock().await;
            inner.last_read_at = snapshot.last_read_at;
            for record in snapshot.messages {
                inner.store.upsert_record(record);
            }
            info!(room_id = room_id.0, count = inner.store.len(), "chat: snapshot loaded");
        }
        session.emit(SessionEvent::MessagesChanged);

        let generation = session.generation.load(Ordering::SeqCst);
        session.spawn_mark_read(generation);

        let supervisor = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.run_connection(generation).await })
        };
        session.inner.lock().await.supervisor = Some(supervisor);

        Ok(session)
    }

    /// Deliberate teardown: supersede the generation so in-flight callbacks
    /// are discarded, cancel timers, close the channel.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.connection = ConnectionState::Closing;
        let _ = self.events.send(SessionEvent::ConnectionChanged(ConnectionState::Closing));
        inner.signaler.abort();
        if let Some(task) = inner.supervisor.take() {
            task.abort();
        }
        if let Some(mut sink) = inner.sink.take() {
            let _ = sink.close().await;
        }
        inner.presence.clear();
        inner.connection = ConnectionState::Idle;
        let _ = self.events.send(SessionEvent::ConnectionChanged(ConnectionState::Idle));
        info!(room_id = self.options.room_id.0, "chat: session closed");
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn viewer_id(&self) -> ViewerId {
        self.options.viewer.viewer_id
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.store.messages().to_vec()
    }

    pub async fn typing_names(&self) -> Vec<String> {
        self.inner.lock().await.presence.names()
    }

    pub async fn last_read_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_read_at
    }

    pub async fn pinned_message(&self) -> Option<ChatMessage> {
        self.inner.lock().await.store.pinned_message().cloned()
    }

    pub async fn room_pinned(&self) -> bool {
        self.inner.lock().await.room_pinned
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    /// Optimistic send: the placeholder is visible immediately and resolved
    /// by correlation ref when the authoritative record comes back (REST
    /// response or push echo, whichever lands first).
    pub async fn send_message(
        self: &Arc<Self>,
        body: &str,
        attachment: Option<AttachmentRecord>,
    ) -> Result<(), MutationError> {
        let client_ref = Uuid::new_v4();
        {
            let mut inner = self.inner.lock().await;
            inner.store.insert_placeholder(ChatMessage::placeholder(
                self.options.viewer.clone(),
                body,
                attachment.clone(),
                client_ref,
            ));
        }
        self.emit(SessionEvent::MessagesChanged);

        let request = SendMessageBody {
            room_id: self.options.room_id,
            body: body.to_string(),
            client_ref,
            attachment,
        };
        match self.backend.send_message(request).await {
            Ok(record) => {
                self.inner.lock().await.store.upsert_record(record);
                self.emit(SessionEvent::MessagesChanged);
                Ok(())
            }
            Err(err) => {
                self.inner.lock().await.store.remove_placeholder(client_ref);
                self.emit(SessionEvent::MessagesChanged);
                Err(self.surface_mutation_error(err))
            }
        }
    }

    pub async fn edit_message(
        self: &Arc<Self>,
        message_id: MessageId,
        body: &str,
    ) -> Result<(), MutationError> {
        let previous = {
            let mut inner = self.inner.lock().await;
            let Some(message) = inner.store.get(message_id) else {
                return Err(MutationError::MissingMessage {
                    message_id: message_id.0,
                });
            };
            let previous = (message.body.clone(), message.is_edited);
            inner.store.apply_update(message_id, body, true);
            previous
        };
        self.emit(SessionEvent::MessagesChanged);

        match self
            .backend
            .edit_message(
                message_id,
                EditMessageBody {
                    body: body.to_string(),
                },
            )
            .await
        {
            Ok(record) => {
                self.inner.lock().await.store.upsert_record(record);
                self.emit(SessionEvent::MessagesChanged);
                Ok(())
            }
            Err(err) => {
                let (body, is_edited) = previous;
                self.inner
                    .lock()
                    .await
                    .store
                    .apply_update(message_id, &body, is_edited);
                self.emit(SessionEvent::MessagesChanged);
                Err(self.surface_mutation_error(err))
            }
        }
    }

    pub async fn delete_message(
        self: &Arc<Self>,
        message_id: MessageId,
    ) -> Result<(), MutationError> {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.store.remove(message_id)
        };
        let Some(removed) = removed else {
            return Err(MutationError::MissingMessage {
                message_id: message_id.0,
            });
        };
        self.emit(SessionEvent::MessagesChanged);

        match self.backend.delete_message(message_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.lock().await.store.restore(removed);
                self.emit(SessionEvent::MessagesChanged);
                Err(self.surface_mutation_error(err))
            }
        }
    }

    /// Toggle the viewer's reaction: none -> value, same value -> off,
    /// other value -> single replacement. The server's echoed list is
    /// authoritative and also folds in other viewers' concurrent reactions.
    pub async fn toggle_reaction(
        self: &Arc<Self>,
        message_id: MessageId,
        value: &str,
    ) -> Result<(), MutationError> {
        let (previous, toggled) = {
            let mut inner = self.inner.lock().await;
            let Some(message) = inner.store.get(message_id) else {
                return Err(MutationError::MissingMessage {
                    message_id: message_id.0,
                });
            };
            let previous = message.reactions.clone();
            let toggled = reactions::toggle(&previous, self.viewer_id(), value);
            inner.store.replace_reactions(message_id, toggled.next.clone());
            (previous, toggled)
        };
        self.emit(SessionEvent::MessagesChanged);

        match self
            .backend
            .set_reaction(
                message_id,
                ReactBody {
                    value: toggled.requested,
                },
            )
            .await
        {
            Ok(authoritative) => {
                self.inner
                    .lock()
                    .await
                    .store
                    .replace_reactions(message_id, authoritative);
                self.emit(SessionEvent::MessagesChanged);
                Ok(())
            }
            Err(err) => {
                self.inner
                    .lock()
                    .await
                    .store
                    .replace_reactions(message_id, previous);
                self.emit(SessionEvent::MessagesChanged);
                Err(self.surface_mutation_error(err))
            }
        }
    }

    pub async fn toggle_message_pin(
        self: &Arc<Self>,
        message_id: MessageId,
    ) -> Result<(), MutationError> {
        let pinned = {
            let mut inner = self.inner.lock().await;
            let Some(message) = inner.store.get(message_id) else {
                return Err(MutationError::MissingMessage {
                    message_id: message_id.0,
                });
            };
            let pinned = !message.is_pinned;
            inner.store.set_message_pin(message_id, pinned);
            pinned
        };
        self.emit(SessionEvent::MessagesChanged);

        match self
            .backend
            .pin_message(message_id, PinBody { pinned })
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.lock().await.store.set_message_pin(message_id, !pinned);
                self.emit(SessionEvent::MessagesChanged);
                Err(self.surface_mutation_error(err))
            }
        }
    }

    /// Room-level pin is a plain boolean unrelated to message pinning.
    pub async fn toggle_room_pin(self: &Arc<Self>) -> Result<(), MutationError> {
        let pinned = {
            let mut inner = self.inner.lock().await;
            inner.room_pinned = !inner.room_pinned;
            inner.room_pinned
        };
        self.emit(SessionEvent::RoomPinChanged(pinned));

        match self
            .backend
            .pin_room(self.options.room_id, PinBody { pinned })
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.lock().await.room_pinned = !pinned;
                self.emit(SessionEvent::RoomPinChanged(!pinned));
                Err(self.surface_mutation_error(err))
            }
        }
    }

    /// Local typing activity. Throttled to one outbound signal per interval
    /// and debounced so rapid keystrokes collapse; only sent while the push
    /// channel is open.
    pub async fn notify_typing(self: &Arc<Self>) {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if inner.connection != ConnectionState::Open {
            return;
        }
        let now = Instant::now();
        match inner.signaler.on_keystroke(now) {
            SignalPlan::SendNow => {
                Self::send_typing_frame(&mut inner, self.options.room_id).await;
                inner.signaler.mark_sent(now);
            }
            SignalPlan::Defer(delay) => {
                let session = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if session.is_stale(generation) {
                        return;
                    }
                    let mut inner = session.inner.lock().await;
                    if inner.connection == ConnectionState::Open {
                        Self::send_typing_frame(&mut inner, session.options.room_id).await;
                    }
                    inner.signaler.mark_sent(Instant::now());
                });
                inner.signaler.set_pending(handle);
            }
            SignalPlan::Collapsed => {}
        }
    }

    async fn send_typing_frame(inner: &mut RoomInner, room_id: RoomId) {
        let Some(sink) = inner.sink.as_mut() else {
            return;
        };
        let frame = ClientFrame::Typing { room_id };
        match serde_json::to_string(&frame) {
            Ok(text) => {
                if let Err(err) = sink.send_text(text).await {
                    debug!(room_id = room_id.0, "push: typing signal failed: {err}");
                }
            }
            Err(err) => debug!("push: typing frame serialization failed: {err}"),
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn surface_mutation_error(&self, err: anyhow::Error) -> MutationError {
        let err = MutationError::from_backend(err);
        self.emit(SessionEvent::MutationFailed(err.to_string()));
        err
    }

    /// Fire-and-forget read mark; a fresher echoed marker updates the local
    /// state. Fired after the snapshot load and after every successful open
    /// so a reconnect self-heals the receipt.
    fn spawn_mark_read(self: &Arc<Self>, generation: u64) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            match session.backend.mark_read(session.options.room_id).await {
                Ok(response) => {
                    let Some(last_read_at) = response.last_read_at else {
                        return;
                    };
                    if session.is_stale(generation) {
                        return;
                    }
                    let mut inner = session.inner.lock().await;
                    if inner.last_read_at.map_or(true, |seen| last_read_at > seen) {
                        inner.last_read_at = Some(last_read_at);
                        drop(inner);
                        session.emit(SessionEvent::LastReadChanged(last_read_at));
                    }
                }
                Err(err) => debug!(
                    room_id = session.options.room_id.0,
                    "chat: read mark failed: {err}"
                ),
            }
        });
    }

    async fn set_connection(&self, generation: u64, state: ConnectionState) {
        if self.is_stale(generation) {
            return;
        }
        {
            let mut inner = self.inner.lock().await;
            inner.connection = state;
            if state != ConnectionState::Open {
                inner.sink = None;
            }
        }
        self.emit(SessionEvent::ConnectionChanged(state));
    }

    /// Connection supervisor: connect, drain frames, reconnect with capped
    /// exponential backoff. Runs until the generation is superseded; errors
    /// drive state transitions, never panics.
    async fn run_connection(self: Arc<Self>, generation: u64) {
        let room_id = self.options.room_id;
        let mut attempt: u32 = 0;
        loop {
            if self.is_stale(generation) {
                return;
            }
            self.set_connection(generation, ConnectionState::Connecting).await;

            match self.connector.connect(room_id, &self.options.token).await {
                Ok((sink, mut stream)) => {
                    if self.is_stale(generation) {
                        return;
                    }
                    attempt = 0;
                    {
                        let mut inner = self.inner.lock().await;
                        inner.sink = Some(sink);
                        inner.connection = ConnectionState::Open;
                    }
                    self.emit(SessionEvent::ConnectionChanged(ConnectionState::Open));
                    info!(room_id = room_id.0, "push: channel open");
                    self.spawn_mark_read(generation);

                    while let Some(frame) = stream.next_text().await {
                        if self.is_stale(generation) {
                            return;
                        }
                        match frame {
                            Ok(text) => self.handle_frame(generation, &text).await,
                            Err(err) => {
                                warn!(room_id = room_id.0, "push: transport error: {err}");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(room_id = room_id.0, "push: connect failed: {err}");
                }
            }

            if self.is_stale(generation) {
                return;
            }
            self.set_connection(generation, ConnectionState::Reconnecting).await;
            attempt += 1;
            let delay = self.options.backoff.delay(attempt);
            info!(
                room_id = room_id.0,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "push: reconnecting after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Route one classified frame into the store and trackers. Frames for
    /// other rooms and stale generations are discarded.
    async fn handle_frame(self: &Arc<Self>, generation: u64, text: &str) {
        let Some(frame) = classify::parse_frame(text) else {
            return;
        };
        match frame {
            PushFrame::MessageCreated { message } => {
                if message.room_id != self.options.room_id {
                    return;
                }
                let outcome = {
                    let mut inner = self.inner.lock().await;
                    inner.store.upsert_record(message.clone())
                };
                if outcome == UpsertOutcome::Inserted {
                    self.badge.message_arrived(&message);
                }
                self.emit(SessionEvent::MessagesChanged);
            }
            PushFrame::MessageUpdated {
                room_id,
                message_id,
                body,
                is_edited,
            } => {
                if room_id != self.options.room_id {
                    return;
                }
                let changed = {
                    let mut inner = self.inner.lock().await;
                    inner.store.apply_update(message_id, &body, is_edited)
                };
                if changed {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushFrame::MessageDeleted {
                room_id,
                message_id,
            } => {
                if room_id != self.options.room_id {
                    return;
                }
                let removed = {
                    let mut inner = self.inner.lock().await;
                    inner.store.remove(message_id)
                };
                if removed.is_some() {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushFrame::ReactionUpdated {
                room_id,
                message_id,
                reactions,
            } => {
                if room_id != self.options.room_id {
                    return;
                }
                let changed = {
                    let mut inner = self.inner.lock().await;
                    inner.store.replace_reactions(message_id, reactions)
                };
                if changed {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushFrame::Typing {
                room_id,
                display_name,
            } => {
                if room_id != self.options.room_id
                    || display_name == self.options.viewer.display_name
                {
                    return;
                }
                let (names, expires_at) = {
                    let mut inner = self.inner.lock().await;
                    let expires_at = inner.presence.refresh(&display_name, Instant::now());
                    (inner.presence.names(), expires_at)
                };
                self.emit(SessionEvent::TypingChanged(names));

                let session = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep_until(expires_at).await;
                    if session.is_stale(generation) {
                        return;
                    }
                    let names = {
                        let mut inner = session.inner.lock().await;
                        if !inner.presence.expire_if_due(&display_name, Instant::now()) {
                            return;
                        }
                        inner.presence.names()
                    };
                    session.emit(SessionEvent::TypingChanged(names));
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
