use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::{info, warn};

use mindful_config::AppConfig;
use mindful_llm::OllamaClient;
use mindful_memory::VectorMemory;
use mindful_runtime::ChatRuntime;
use mindful_store::{Store, UserStore};

use crate::handlers;
use crate::session::SessionStore;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ChatRuntime>,
    pub users: UserStore,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(runtime: ChatRuntime, users: UserStore) -> Self {
        let sessions = SessionStore::new(runtime.config.server.session_ttl_minutes);
        Self {
            runtime: Arc::new(runtime),
            users,
            sessions: Arc::new(sessions),
        }
    }

    /// Wire the Ollama client, the document store and per-user memory from
    /// `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let ollama = Arc::new(OllamaClient::from_config(&config.llm, &config.embedding)?);
        let store = Store::open(&config.store.path)?;
        let memory = Arc::new(VectorMemory::from_config(&config.memory, ollama.clone()));
        let runtime = ChatRuntime::new(config, ollama, memory, store.chat_log())?;
        Ok(Self::new(runtime, store.users()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/signup", get(handlers::signup_form).post(handlers::signup))
        .route("/login", get(handlers::login_form).post(handlers::login))
        .route("/logout", get(handlers::logout))
        .route("/history", get(handlers::history))
        .route("/chat", post(handlers::chat))
        .with_state(state)
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let bind = config.server.bind.clone();
    info!(
        model = %config.llm.chat_model,
        embedding_model = %config.embedding.model,
        ollama = %config.llm.ollama_base_url,
        data_dir = %config.memory.data_dir,
        "starting mindful"
    );
    let state = AppState::from_config(config)?;

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
