//! banter — real-time messaging bridge with debounced AI auto-replies.
//!
//! Wires the pieces together: conversation store, generative backend,
//! auto-reply engine, connection supervisor (via the transport sidecar), and
//! the observer gateway.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Result,
    clap::Parser,
    tokio_util::sync::CancellationToken,
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use {
    banter_auto_reply::ReplyEngine,
    banter_gateway::{GatewaySessionSink, GatewayState, serve},
    banter_llm::OllamaProvider,
    banter_media::{HttpFetcher, Materializer},
    banter_session::{SidecarTransport, Supervisor, SupervisorOptions, sidecar},
    banter_store::ConversationStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "banter",
    version,
    about = "Real-time messaging bridge with debounced AI auto-replies"
)]
struct Cli {
    /// Address the observer gateway binds to.
    #[arg(long, env = "BANTER_BIND", default_value = "127.0.0.1:3901")]
    bind: SocketAddr,

    /// WebSocket URL of the transport sidecar.
    #[arg(long, env = "BANTER_SIDECAR_URL", default_value = sidecar::DEFAULT_SIDECAR_URL)]
    sidecar_url: String,

    /// Directory with the sidecar's stored pairing credentials.
    #[arg(long, env = "BANTER_AUTH_DIR")]
    auth_dir: Option<String>,

    /// Base URL of the generative backend.
    #[arg(long, env = "BANTER_OLLAMA_URL", default_value = "http://127.0.0.1:11434")]
    ollama_url: String,

    /// Model the generative backend replies with.
    #[arg(long, env = "BANTER_MODEL", default_value = "gemma3:1b")]
    model: String,

    /// Debounce window before an automatic reply, in seconds.
    #[arg(long, env = "BANTER_DEBOUNCE_SECS", default_value_t = 15)]
    debounce_secs: u64,

    /// Fixed delay between reconnect attempts, in seconds.
    #[arg(long, env = "BANTER_RECONNECT_SECS", default_value_t = 10)]
    reconnect_secs: u64,

    /// Timeout for a single media download, in seconds.
    #[arg(long, env = "BANTER_MEDIA_TIMEOUT_SECS", default_value_t = 30)]
    media_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let store = Arc::new(ConversationStore::new());
    let provider = Arc::new(OllamaProvider::new(cli.ollama_url.clone(), cli.model.clone()));
    let engine = Arc::new(ReplyEngine::new(
        provider.clone(),
        Duration::from_secs(cli.debounce_secs),
    ));

    let state = GatewayState::new(store.clone(), engine.clone(), provider);
    let sink = GatewaySessionSink::from_state(state.clone());

    let transport = Arc::new(SidecarTransport::new(
        cli.sidecar_url.clone(),
        cli.auth_dir.clone(),
    ));
    let materializer = Arc::new(Materializer::new(Arc::new(HttpFetcher::new(
        Duration::from_secs(cli.media_timeout_secs),
    ))));
    let supervisor = Supervisor::new(
        transport,
        store,
        materializer,
        sink,
        engine.clone(),
        cancel.child_token(),
        SupervisorOptions {
            reconnect_interval: Duration::from_secs(cli.reconnect_secs),
        },
    );
    engine.set_outbound(Arc::new(supervisor.handle()));
    state.set_supervisor(supervisor.handle());

    info!(
        model = %cli.model,
        backend = %cli.ollama_url,
        sidecar = %cli.sidecar_url,
        "starting banter"
    );
    supervisor.start();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    serve(state, cli.bind, cancel).await
}
