use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use {banter_llm::ReplyProvider, banter_store::BotMode};

/// Fixed reply used when the generative backend fails.
pub const FALLBACK_REPLY: &str = "Sorry, I am unable to process your request at the moment.";

/// Delay between a qualifying inbound message and the automatic reply.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(15);

/// Send path for produced replies — implemented by the connection supervisor.
#[async_trait]
pub trait ReplyOutbound: Send + Sync {
    async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()>;
}

/// A countdown armed for one conversation.
///
/// The generation stamp makes claim/cancel races deterministic: a firing task
/// only proceeds if its own stamp is still in the arena, and removing the
/// entry (cancel, restart, or claim) happens under the arena lock.
struct ArmedReply {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-conversation debounce/cancel engine.
///
/// At most one armed countdown exists per conversation; arming again restarts
/// the window with the new trigger text. Countdowns for different
/// conversations are independent tasks.
pub struct ReplyEngine {
    provider: Arc<dyn ReplyProvider>,
    outbound: RwLock<Option<Arc<dyn ReplyOutbound>>>,
    mode: RwLock<BotMode>,
    debounce: Duration,
    armed: Mutex<HashMap<String, ArmedReply>>,
    generations: AtomicU64,
}

impl ReplyEngine {
    pub fn new(provider: Arc<dyn ReplyProvider>, debounce: Duration) -> Self {
        Self {
            provider,
            outbound: RwLock::new(None),
            mode: RwLock::new(BotMode::default()),
            debounce,
            armed: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Wire the send path. Late-bound because the supervisor that implements
    /// it is constructed after the engine.
    pub fn set_outbound(&self, outbound: Arc<dyn ReplyOutbound>) {
        *self.outbound.write().unwrap() = Some(outbound);
    }

    pub fn mode(&self) -> BotMode {
        *self.mode.read().unwrap()
    }

    /// Change the global mode. Effective for subsequent inbound messages;
    /// an already-armed countdown completes under the mode at arming time.
    pub fn set_mode(&self, mode: BotMode) {
        *self.mode.write().unwrap() = mode;
        info!(%mode, "bot mode updated");
    }

    /// React to an inbound non-self message: arm (or restart) the
    /// conversation's countdown when the mode allows automatic replies.
    pub fn on_inbound(self: &Arc<Self>, conversation_id: &str, trigger_text: &str) {
        if self.mode() != BotMode::Auto {
            debug!(conversation_id, mode = %self.mode(), "auto reply disabled, not arming");
            return;
        }
        self.arm(conversation_id, trigger_text);
    }

    fn arm(self: &Arc<Self>, conversation_id: &str, trigger_text: &str) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(self);
        let conversation = conversation_id.to_string();
        let trigger = trigger_text.to_string();
        let delay = self.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.fire(&conversation, generation, trigger).await;
        });

        let mut armed = self.armed.lock().unwrap();
        if let Some(previous) = armed.insert(conversation_id.to_string(), ArmedReply {
            generation,
            handle,
        }) {
            previous.handle.abort();
            debug!(conversation_id, "restarted reply countdown");
        } else {
            debug!(conversation_id, delay_secs = delay.as_secs(), "armed reply countdown");
        }
    }

    /// Clear a pending countdown. Used for the observer typing signal and
    /// implicitly by manual sends. Returns whether one was armed.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let removed = self.armed.lock().unwrap().remove(conversation_id);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                info!(conversation_id, "auto reply cancelled");
                true
            },
            None => false,
        }
    }

    /// Whether a countdown is currently armed for the conversation.
    pub fn is_armed(&self, conversation_id: &str) -> bool {
        self.armed.lock().unwrap().contains_key(conversation_id)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().unwrap().len()
    }

    async fn fire(&self, conversation_id: &str, generation: u64, trigger: String) {
        // Claim: remove our own arena entry, but only if this countdown is
        // still the live one. A cancel or restart that got the lock first
        // wins; once claimed, the reply runs to completion.
        let claimed = {
            let mut armed = self.armed.lock().unwrap();
            match armed.get(conversation_id) {
                Some(entry) if entry.generation == generation => {
                    armed.remove(conversation_id);
                    true
                },
                _ => false,
            }
        };
        if !claimed {
            debug!(conversation_id, "countdown superseded before firing");
            return;
        }

        if trigger.is_empty() {
            debug!(conversation_id, "no trigger text, skipping automatic reply");
            return;
        }

        let reply = match self.provider.generate(&trigger).await {
            Ok(text) => text,
            Err(e) => {
                warn!(conversation_id, error = %e, "generation failed, sending fallback reply");
                FALLBACK_REPLY.to_string()
            },
        };

        let outbound = self.outbound.read().unwrap().clone();
        match outbound {
            Some(out) => {
                if let Err(e) = out.send_text(conversation_id, &reply).await {
                    warn!(conversation_id, error = %e, "failed to deliver automatic reply");
                }
            },
            None => warn!(conversation_id, "no outbound wired, dropping automatic reply"),
        }
    }
}
