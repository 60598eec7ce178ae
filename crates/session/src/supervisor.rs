use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::RwLock,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    banter_auto_reply::{ReplyEngine, ReplyOutbound},
    banter_media::{Materializer, MediaRef},
    banter_store::{
        ContentKind, ConversationMeta, ConversationStore, Message, MessageOrigin,
    },
};

use crate::transport::{DisconnectReason, RawMessage, Transport, TransportEvent, TransportHandle};

// ── Session state machine ────────────────────────────────────────────────────

/// State of the single logical link to the external network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingPairing { challenge: String },
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing { .. } => "awaiting_pairing",
            ConnectionState::Connected => "connected",
        }
    }
}

// ── Fan-out seam ─────────────────────────────────────────────────────────────

/// Observable state changes produced by the supervisor. The gateway turns
/// these into broadcast frames.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PairingRequired { challenge: String },
    Connected,
    /// Terminal loss (logged out): re-pairing is required.
    ConnectionLost,
    DirectoryUpdated,
    MessageAppended { message: Message },
}

#[async_trait]
pub trait SessionEventSink: Send + Sync {
    async fn emit(&self, event: SessionEvent);
}

// ── Supervisor ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Fixed delay between reconnect attempts after a transient loss.
    pub reconnect_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(10),
        }
    }
}

struct SessionInfo {
    state: ConnectionState,
    retry_count: u32,
    /// Single-in-progress guard: no two connect attempts run concurrently.
    connecting: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    store: Arc<ConversationStore>,
    materializer: Arc<Materializer>,
    sink: Arc<dyn SessionEventSink>,
    engine: Arc<ReplyEngine>,
    session: Mutex<SessionInfo>,
    handle: RwLock<Option<Arc<dyn TransportHandle>>>,
    reconnect_interval: Duration,
    cancel: CancellationToken,
}

/// Owns the transport session lifecycle and feeds normalized updates into
/// the store, the reply engine, and the fan-out sink.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ConversationStore>,
        materializer: Arc<Materializer>,
        sink: Arc<dyn SessionEventSink>,
        engine: Arc<ReplyEngine>,
        cancel: CancellationToken,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                materializer,
                sink,
                engine,
                session: Mutex::new(SessionInfo {
                    state: ConnectionState::Disconnected,
                    retry_count: 0,
                    connecting: false,
                }),
                handle: RwLock::new(None),
                reconnect_interval: options.reconnect_interval,
                cancel,
            }),
        }
    }

    /// Cheap clone used by the gateway and the reply engine's send path.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Kick off the first connect attempt.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            connect_once(shared).await;
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().unwrap().state.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.session.lock().unwrap().retry_count
    }
}

/// Cloneable handle for outbound sends and state inspection.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().unwrap().state.clone()
    }

    /// Dispatch an outbound text message and mirror it into the store as a
    /// self-authored message. A transport failure is returned to the caller;
    /// nothing is appended in that case.
    pub async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()> {
        let handle = self
            .shared
            .handle
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("not connected to the messaging network"))?;
        handle.send_text(conversation_id, text).await?;

        let message = Message {
            conversation_id: conversation_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            from_self: true,
            timestamp: now_ms(),
            kind: ContentKind::Text,
            text: text.to_string(),
            media_inline: None,
            media_failed: false,
        };
        let result = self
            .shared
            .store
            .append(message.clone(), MessageOrigin::Live);
        if result.new_conversation {
            self.shared.sink.emit(SessionEvent::DirectoryUpdated).await;
        }
        if result.appended {
            self.shared
                .sink
                .emit(SessionEvent::MessageAppended { message })
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyOutbound for SupervisorHandle {
    async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()> {
        SupervisorHandle::send_text(self, conversation_id, text).await
    }
}

// ── Connect / reconnect ──────────────────────────────────────────────────────

async fn connect_once(shared: Arc<Shared>) {
    {
        let mut session = shared.session.lock().unwrap();
        if session.connecting {
            debug!("connect attempt already in flight");
            return;
        }
        session.connecting = true;
        session.state = ConnectionState::Connecting;
    }

    info!("connecting to messaging network");
    match shared.transport.connect().await {
        Ok((handle, events)) => {
            *shared.handle.write().await = Some(handle);
            tokio::spawn(pump(Arc::clone(&shared), events));
        },
        Err(e) => {
            warn!(error = %e, "connect attempt failed");
            {
                let mut session = shared.session.lock().unwrap();
                session.connecting = false;
                session.retry_count += 1;
                session.state = ConnectionState::Connecting;
            }
            schedule_reconnect(shared);
        },
    }
}

fn schedule_reconnect(shared: Arc<Shared>) {
    let interval = shared.reconnect_interval;
    tokio::spawn(async move {
        let cancelled = shared.cancel.clone();
        tokio::select! {
            _ = cancelled.cancelled() => {},
            _ = tokio::time::sleep(interval) => {
                connect_once(shared).await;
            },
        }
    });
}

// ── Event pump ───────────────────────────────────────────────────────────────

async fn pump(shared: Arc<Shared>, mut events: tokio::sync::mpsc::Receiver<TransportEvent>) {
    loop {
        let event = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(event) => {
                if !handle_event(&shared, event).await {
                    break;
                }
            },
            None => {
                // Session stream ended without a close event: transient loss.
                handle_closed(&shared, DisconnectReason::default()).await;
                break;
            },
        }
    }
}

/// Apply one transport event. Returns false when the session is over and the
/// pump should stop.
async fn handle_event(shared: &Arc<Shared>, event: TransportEvent) -> bool {
    match event {
        TransportEvent::PairingChallenge { challenge } => {
            info!("pairing challenge received");
            {
                let mut session = shared.session.lock().unwrap();
                session.state = ConnectionState::AwaitingPairing {
                    challenge: challenge.clone(),
                };
            }
            shared
                .sink
                .emit(SessionEvent::PairingRequired { challenge })
                .await;
            true
        },
        TransportEvent::Opened => {
            info!("messaging network connection opened");
            {
                let mut session = shared.session.lock().unwrap();
                session.state = ConnectionState::Connected;
                session.connecting = false;
                session.retry_count = 0;
            }
            shared.sink.emit(SessionEvent::Connected).await;
            true
        },
        TransportEvent::Closed { reason } => {
            handle_closed(shared, reason).await;
            false
        },
        TransportEvent::HistorySync {
            conversations,
            messages,
        } => {
            info!(
                conversations = conversations.len(),
                messages = messages.len(),
                "merging conversation history"
            );
            for meta in conversations {
                shared.store.merge_conversation(meta);
            }
            for raw in messages {
                if raw.conversation_id.is_empty() || raw.message_id.is_empty() {
                    warn!("dropping malformed history message");
                    continue;
                }
                let message = normalize(shared, raw).await;
                shared.store.append(message, MessageOrigin::History);
            }
            shared.sink.emit(SessionEvent::DirectoryUpdated).await;
            true
        },
        TransportEvent::MessageReceived(raw) => {
            if raw.conversation_id.is_empty() || raw.message_id.is_empty() {
                warn!("dropping malformed inbound message event");
                return true;
            }

            // Name fresh conversations after the sender when we have one.
            let mut created = false;
            if !shared.store.contains(&raw.conversation_id) {
                created = shared.store.merge_conversation(ConversationMeta {
                    id: raw.conversation_id.clone(),
                    display_name: raw
                        .sender_name
                        .clone()
                        .unwrap_or_else(|| raw.conversation_id.clone()),
                    unread_count: 0,
                });
            }

            let message = normalize(shared, raw).await;
            let conversation_id = message.conversation_id.clone();
            let from_self = message.from_self;
            let trigger = message.text.clone();

            let result = shared
                .store
                .append(message.clone(), MessageOrigin::Live);
            if !result.appended {
                debug!(conversation_id, "dropping duplicate inbound message");
                return true;
            }

            shared
                .sink
                .emit(SessionEvent::MessageAppended { message })
                .await;
            if created || result.new_conversation {
                shared.sink.emit(SessionEvent::DirectoryUpdated).await;
            }

            if !from_self {
                shared.engine.on_inbound(&conversation_id, &trigger);
            }
            true
        },
    }
}

async fn handle_closed(shared: &Arc<Shared>, reason: DisconnectReason) {
    *shared.handle.write().await = None;

    if reason.logged_out {
        warn!(code = ?reason.code, "logged out by the network, re-pairing required");
        {
            let mut session = shared.session.lock().unwrap();
            session.connecting = false;
            session.state = ConnectionState::Disconnected;
        }
        shared.sink.emit(SessionEvent::ConnectionLost).await;
    } else {
        info!(code = ?reason.code, "connection closed, scheduling reconnect");
        {
            let mut session = shared.session.lock().unwrap();
            session.connecting = false;
            session.retry_count += 1;
            session.state = ConnectionState::Connecting;
        }
        schedule_reconnect(Arc::clone(shared));
    }
}

// ── Normalization ────────────────────────────────────────────────────────────

async fn normalize(shared: &Arc<Shared>, raw: RawMessage) -> Message {
    let kind = if raw.media.is_some() {
        ContentKind::Media
    } else if raw.unsupported {
        ContentKind::Unsupported
    } else {
        ContentKind::Text
    };

    let (media_inline, media_failed) = match &raw.media {
        Some(media) => {
            let media_ref = MediaRef {
                url: media.url.clone(),
                mime_type: media.mime_type.clone(),
            };
            match shared.materializer.materialize(&media_ref).await {
                Ok(inline) => (Some(inline), false),
                Err(e) => {
                    warn!(
                        message_id = %raw.message_id,
                        error = %e,
                        "media materialization failed, keeping message without payload"
                    );
                    (None, true)
                },
            }
        },
        None => (None, false),
    };

    Message {
        conversation_id: raw.conversation_id,
        message_id: raw.message_id,
        from_self: raw.from_self,
        timestamp: raw.timestamp,
        kind,
        text: raw.body,
        media_inline,
        media_failed,
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        pin::Pin,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use {
        banter_llm::{ReplyProvider, StreamEvent},
        banter_media::{Error as MediaError, MediaFetcher},
        tokio::sync::mpsc,
        tokio_stream::Stream,
    };

    use super::*;

    // ── Test doubles ─────────────────────────────────────────────────────

    struct StubProvider;

    #[async_trait]
    impl ReplyProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn model(&self) -> &str {
            "stub-1"
        }

        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            Ok(format!("re: {prompt}"))
        }

        fn stream(&self, _prompt: String) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
            Box::pin(tokio_stream::iter(vec![StreamEvent::Done]))
        }
    }

    struct MockHandle {
        sends: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl TransportHandle for MockHandle {
        async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("send rejected");
            }
            self.sends
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// Transport whose sessions are scripted by the test: each connect pops
    /// the next prepared event receiver.
    struct MockTransport {
        connects: AtomicUsize,
        sessions: Mutex<Vec<mpsc::Receiver<TransportEvent>>>,
        handle: Arc<MockHandle>,
    }

    impl MockTransport {
        fn with_sessions(receivers: Vec<mpsc::Receiver<TransportEvent>>) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                sessions: Mutex::new(receivers),
                handle: Arc::new(MockHandle {
                    sends: Mutex::new(Vec::new()),
                    fail: false,
                }),
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(
            &self,
        ) -> anyhow::Result<(Arc<dyn TransportHandle>, mpsc::Receiver<TransportEvent>)> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.is_empty() {
                anyhow::bail!("no session available");
            }
            Ok((self.handle.clone() as Arc<dyn TransportHandle>, sessions.remove(0)))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionEventSink for RecordingSink {
        async fn emit(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl MediaFetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> banter_media::Result<Vec<u8>> {
            Err(MediaError::fetch(
                url.to_string(),
                std::io::Error::other("key expired"),
            ))
        }
    }

    struct OkFetcher;

    #[async_trait]
    impl MediaFetcher for OkFetcher {
        async fn fetch(&self, _url: &str) -> banter_media::Result<Vec<u8>> {
            Ok(b"bytes".to_vec())
        }
    }

    // ── Harness ──────────────────────────────────────────────────────────

    struct Harness {
        supervisor: Supervisor,
        transport: Arc<MockTransport>,
        sink: Arc<RecordingSink>,
        store: Arc<ConversationStore>,
        engine: Arc<ReplyEngine>,
        senders: Vec<mpsc::Sender<TransportEvent>>,
    }

    fn harness(session_count: usize, fetcher: Arc<dyn MediaFetcher>) -> Harness {
        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..session_count {
            let (tx, rx) = mpsc::channel(32);
            senders.push(tx);
            receivers.push(rx);
        }
        let transport = Arc::new(MockTransport::with_sessions(receivers));
        let store = Arc::new(ConversationStore::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = Arc::new(ReplyEngine::new(
            Arc::new(StubProvider),
            Duration::from_secs(15),
        ));
        let supervisor = Supervisor::new(
            transport.clone(),
            store.clone(),
            Arc::new(Materializer::new(fetcher)),
            sink.clone(),
            engine.clone(),
            CancellationToken::new(),
            SupervisorOptions {
                reconnect_interval: Duration::from_secs(10),
            },
        );
        engine.set_outbound(Arc::new(supervisor.handle()));
        Harness {
            supervisor,
            transport,
            sink,
            store,
            engine,
            senders,
        }
    }

    /// Let spawned supervisor tasks run.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn raw(conv: &str, id: &str, body: &str, from_self: bool) -> RawMessage {
        RawMessage {
            message_id: id.into(),
            conversation_id: conv.into(),
            sender_name: Some("Ada".into()),
            from_self,
            timestamp: 7,
            body: body.into(),
            media: None,
            unsupported: false,
        }
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn pairing_challenge_then_open() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;

        h.senders[0]
            .send(TransportEvent::PairingChallenge {
                challenge: "qr-blob".into(),
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            h.supervisor.state(),
            ConnectionState::AwaitingPairing {
                challenge: "qr-blob".into()
            }
        );
        assert!(matches!(
            h.sink.events().as_slice(),
            [SessionEvent::PairingRequired { challenge }] if challenge == "qr-blob"
        ));

        h.senders[0].send(TransportEvent::Opened).await.unwrap();
        settle().await;
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_close_reconnects_after_interval() {
        let h = harness(2, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();
        settle().await;

        h.senders[0]
            .send(TransportEvent::Closed {
                reason: DisconnectReason {
                    code: Some("stream-errored".into()),
                    logged_out: false,
                },
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.supervisor.state(), ConnectionState::Connecting);
        assert_eq!(h.supervisor.retry_count(), 1);
        assert_eq!(h.transport.connects(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 2);

        h.senders[1].send(TransportEvent::Opened).await.unwrap();
        settle().await;
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
        assert_eq!(h.supervisor.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn logged_out_close_is_terminal() {
        let h = harness(2, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();
        settle().await;

        h.senders[0]
            .send(TransportEvent::Closed {
                reason: DisconnectReason {
                    code: Some("logged-out".into()),
                    logged_out: true,
                },
            })
            .await
            .unwrap();
        settle().await;

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ConnectionLost)));

        // No reconnect ever happens for the terminal reason.
        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_respects_in_progress_guard() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        h.supervisor.start();
        settle().await;
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_message_is_stored_broadcast_and_armed() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        h.senders[0]
            .send(TransportEvent::MessageReceived(raw("c1", "m1", "Hello", false)))
            .await
            .unwrap();
        settle().await;

        let history = h.store.history("c1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "Hello");
        assert_eq!(h.store.display_name("c1").as_deref(), Some("Ada"));
        assert!(h.engine.is_armed("c1"));
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::MessageAppended { message } if message.text == "Hello")));
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::DirectoryUpdated)));
    }

    #[tokio::test(start_paused = true)]
    async fn self_authored_message_never_arms() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        h.senders[0]
            .send(TransportEvent::MessageReceived(raw("c1", "m1", "mine", true)))
            .await
            .unwrap();
        settle().await;

        assert_eq!(h.store.history("c1").map(|m| m.len()), Some(1));
        assert!(!h.engine.is_armed("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_inbound_is_dropped_not_fatal() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        h.senders[0]
            .send(TransportEvent::MessageReceived(raw("", "m1", "ghost", false)))
            .await
            .unwrap();
        h.senders[0]
            .send(TransportEvent::MessageReceived(raw("c1", "", "ghost", false)))
            .await
            .unwrap();
        // A well-formed event after the malformed ones still lands.
        h.senders[0]
            .send(TransportEvent::MessageReceived(raw("c1", "m2", "alive", false)))
            .await
            .unwrap();
        settle().await;

        assert_eq!(h.store.len(), 1);
        assert_eq!(h.store.history("c1").map(|m| m.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_media_degrades_to_flagged_message() {
        let h = harness(1, Arc::new(FailingFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        let mut message = raw("c1", "m1", "", false);
        message.media = Some(crate::transport::RawMedia {
            url: "https://cdn/x".into(),
            mime_type: "image/jpeg".into(),
        });
        h.senders[0]
            .send(TransportEvent::MessageReceived(message))
            .await
            .unwrap();
        settle().await;

        let history = h.store.history("c1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, ContentKind::Media);
        assert!(history[0].media_failed);
        assert!(history[0].media_inline.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_media_is_inlined() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        let mut message = raw("c1", "m1", "caption", false);
        message.media = Some(crate::transport::RawMedia {
            url: "https://cdn/x".into(),
            mime_type: "image/png".into(),
        });
        h.senders[0]
            .send(TransportEvent::MessageReceived(message))
            .await
            .unwrap();
        settle().await;

        let history = h.store.history("c1").unwrap();
        assert!(!history[0].media_failed);
        assert!(
            history[0]
                .media_inline
                .as_deref()
                .is_some_and(|d| d.starts_with("data:image/png;base64,"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn history_sync_merges_idempotently() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();

        let sync = TransportEvent::HistorySync {
            conversations: vec![ConversationMeta {
                id: "c1".into(),
                display_name: "Ada".into(),
                unread_count: 3,
            }],
            messages: vec![raw("c1", "m1", "old", false), raw("c1", "m2", "older", true)],
        };
        h.senders[0].send(sync.clone()).await.unwrap();
        h.senders[0].send(sync).await.unwrap();
        settle().await;

        assert_eq!(h.store.history("c1").map(|m| m.len()), Some(2));
        let summaries = h.store.summaries();
        assert_eq!(summaries[0].display_name, "Ada");
        assert_eq!(summaries[0].unread_count, 3);
        // History never arms the reply engine.
        assert_eq!(h.engine.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_text_appends_self_authored_message() {
        let h = harness(1, Arc::new(OkFetcher));
        h.supervisor.start();
        settle().await;
        h.senders[0].send(TransportEvent::Opened).await.unwrap();
        settle().await;

        h.supervisor
            .handle()
            .send_text("c1", "manual hello")
            .await
            .unwrap();

        assert_eq!(
            h.transport.handle.sends.lock().unwrap().as_slice(),
            [("c1".to_string(), "manual hello".to_string())]
        );
        let history = h.store.history("c1").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].from_self);
        assert_eq!(history[0].text, "manual hello");
    }

    #[tokio::test(start_paused = true)]
    async fn send_text_before_connection_is_an_error() {
        let h = harness(1, Arc::new(OkFetcher));
        let result = h.supervisor.handle().send_text("c1", "too soon").await;
        assert!(result.is_err());
        assert!(h.store.is_empty());
    }
}
