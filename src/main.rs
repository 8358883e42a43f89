use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use menu_optimizer::api::{create_router, spawn_session_sweeper, AppState};
use menu_optimizer::config::Config;
use menu_optimizer::models::Catalog;
use menu_optimizer::services::{LlmClient, Pipeline, PipelineSettings, TemplateSet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("menu_optimizer=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let catalog = Catalog::load(&config.catalog_path, config.continuous_columns.as_deref())
        .with_context(|| format!("Failed to load catalog from {}", config.catalog_path))?;

    let templates = match &config.templates_path {
        Some(path) => TemplateSet::load(path).with_context(|| format!("Failed to load templates from {}", path))?,
        None => {
            tracing::info!("TEMPLATES_PATH not set, using built-in prompt templates");
            TemplateSet::builtin()
        }
    };

    let llm = LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        Duration::from_secs(config.llm_timeout_secs),
    )?;
    tracing::info!(model = %config.llm_model, "LLM client initialized");

    let settings = PipelineSettings {
        overlap: config.overlap_policy,
        history_window: config.history_window,
    };
    let pipeline = Pipeline::new(Arc::new(catalog), templates, Arc::new(llm), settings);

    let state = AppState::new(pipeline, config.default_top_k, config.max_top_k);
    spawn_session_sweeper(
        state.sessions.clone(),
        Duration::from_secs(config.session_ttl_secs),
        Duration::from_secs(config.session_sweep_secs),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
