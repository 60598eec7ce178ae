use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock as StdRwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use tokio::sync::{RwLock, mpsc};

use {
    banter_auto_reply::ReplyEngine,
    banter_llm::ReplyProvider,
    banter_session::SupervisorHandle,
    banter_store::ConversationStore,
};

// ── Connected observer ───────────────────────────────────────────────────────

/// One observer connection, reachable through its write-loop channel.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Serialized frames destined for this observer's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Queue a serialized frame. False means the observer is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state.
pub struct GatewayState {
    /// All connected observers, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Monotonically increasing sequence counter for broadcast events.
    seq: AtomicU64,
    pub version: String,
    pub hostname: String,
    pub store: Arc<ConversationStore>,
    pub engine: Arc<ReplyEngine>,
    pub provider: Arc<dyn ReplyProvider>,
    /// Late-bound: the supervisor is constructed after the gateway state
    /// because it needs the gateway as its event sink.
    supervisor: StdRwLock<Option<SupervisorHandle>>,
}

impl GatewayState {
    pub fn new(
        store: Arc<ConversationStore>,
        engine: Arc<ReplyEngine>,
        provider: Arc<dyn ReplyProvider>,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            store,
            engine,
            provider,
            supervisor: StdRwLock::new(None),
        })
    }

    pub fn set_supervisor(&self, handle: SupervisorHandle) {
        *self.supervisor.write().unwrap() = Some(handle);
    }

    pub fn supervisor(&self) -> Option<SupervisorHandle> {
        self.supervisor.read().unwrap().clone()
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Snapshot handed to a freshly connected observer: the conversation
    /// directory with previews, plus the current bot mode.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "chats": self.store.summaries(),
            "botMode": self.engine.mode(),
        })
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
