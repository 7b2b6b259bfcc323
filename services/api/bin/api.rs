//! Main Entrypoint for the Confirmation Agent Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the classifier, tool, engine, and session store.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use confirm_api::{
    config::{ClassifierKind, Config},
    router::create_router,
    state::AppState,
};
use confirm_core::{
    ConversationEngine, ConversationService, KeywordClassifier, LLMClassifier, RestValueInvoker,
    SessionStore, UtteranceClassifier,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// File name (without extension) of the classifier prompt in `PROMPTS_PATH`.
const CLASSIFIER_PROMPT: &str = "confirmation_classifier";

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads `<prompts_path>/<name>.md`, if present.
fn load_prompt(prompts_path: &std::path::Path, name: &str) -> anyhow::Result<Option<String>> {
    let path = prompts_path.join(format!("{name}.md"));
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read prompt {}", path.display()))?;
    Ok(Some(content))
}

fn build_classifier(config: &Config) -> anyhow::Result<Arc<dyn UtteranceClassifier>> {
    let api = match config.classifier {
        ClassifierKind::Keyword => {
            info!("Using keyword confirmation classifier.");
            return Ok(Arc::new(KeywordClassifier::default()));
        }
        ClassifierKind::OpenAI => {
            info!("Using OpenAI confirmation classifier.");
            (
                config
                    .openai_api_key
                    .as_ref()
                    .context("OPENAI_API_KEY not set")?,
                "https://api.openai.com/v1/",
            )
        }
        ClassifierKind::Gemini => {
            info!("Using Gemini confirmation classifier.");
            (
                config
                    .gemini_api_key
                    .as_ref()
                    .context("GEMINI_API_KEY not set")?,
                "https://generativelanguage.googleapis.com/v1beta/openai",
            )
        }
    };
    let (api_key, api_base) = api;

    let prompt = load_prompt(&config.prompts_path, CLASSIFIER_PROMPT)?;
    if prompt.is_none() {
        warn!(path = %config.prompts_path.display(), "Classifier prompt not found; using built-in prompt.");
    }
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(api_base);
    Ok(Arc::new(LLMClassifier::new(
        openai_config,
        config.chat_model.clone(),
        prompt,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize the Conversation Service ---
    let classifier = build_classifier(&config)?;
    let tool = Arc::new(RestValueInvoker::new(config.resource_base_url.clone()));
    let engine = ConversationEngine::new(classifier, tool).with_tool_timeout(config.tool_timeout);
    let service = ConversationService::new(Arc::new(SessionStore::new()), Arc::new(engine))
        .with_busy_policy(config.busy_policy);
    let sweeper = service.spawn_sweeper(config.sweep_interval, config.session_idle);

    let app_state = Arc::new(AppState {
        service,
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        classifier = ?config.classifier,
        resource = %config.resource_base_url,
        busy_policy = ?config.busy_policy,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("Server has shut down.");
    Ok(())
}
