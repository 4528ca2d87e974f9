//! LLM Router - main entry point.
//!
//! Builds the runtime, loads the catalog, connects the coordination
//! store when the configured strategy needs it, spawns the keep-alive
//! monitor and serves the router. Startup failures exit non-zero before
//! any traffic is accepted.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use llm_router_rust::api::{build_router, AppState};
use llm_router_rust::core::logging::init_tracing;
use llm_router_rust::core::{init_metrics, AppConfig, ModelCatalog};
use llm_router_rust::services::strategies::build_strategy;
use llm_router_rust::services::{
    HookRegistry, KeepAliveMonitor, PromptStore, ProviderChooser, RedisStore,
};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok());

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_tracing("info");
    init_metrics();

    let config = AppConfig::from_env()?;
    tracing::info!(
        strategy = %config.balance_strategy,
        prefix = %config.api_prefix,
        "starting llm-router"
    );

    let catalog = Arc::new(
        ModelCatalog::load(&config.models_config_path).with_context(|| {
            format!("loading model catalog from {}", config.models_config_path)
        })?,
    );
    tracing::info!(
        models = catalog.models.len(),
        "model catalog loaded"
    );
    for name in catalog.active_model_names() {
        let providers = catalog.entry(&name).map(|e| e.providers.len()).unwrap_or(0);
        tracing::info!("  - {}: {} provider(s)", name, providers);
    }

    // The coordination store: mandatory for the first_available family,
    // optional (keep-alive only) otherwise.
    let store = if config.redis.is_configured() {
        match RedisStore::connect(&config.redis.url()).await {
            Ok(store) => {
                store.ping().await.context("coordination store ping")?;
                tracing::info!(
                    host = %config.redis.host,
                    port = config.redis.port,
                    "coordination store connected"
                );
                Some(Arc::new(store))
            }
            Err(err) if config.strategy_requires_store() => {
                return Err(anyhow::anyhow!(err).context("coordination store is required"));
            }
            Err(err) => {
                tracing::warn!(error = %err, "coordination store unreachable, keep-alive disabled");
                None
            }
        }
    } else {
        None
    };

    let strategy = build_strategy(
        &config.balance_strategy,
        store.clone(),
        config.request_timeout_secs,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if config.clear_buffers {
        if let Some(store) = &store {
            let models: Vec<(String, Vec<String>)> = catalog
                .models
                .iter()
                .map(|(name, entry)| {
                    (
                        name.clone(),
                        entry.providers.iter().map(|p| p.id.clone()).collect(),
                    )
                })
                .collect();
            if let Err(err) = store.clear_model_buffers(&models).await {
                tracing::warn!(error = %err, "coordination buffer purge failed");
            }
        }
    }

    let chooser = Arc::new(ProviderChooser::new(
        catalog.clone(),
        strategy,
        store.clone(),
    ));

    let http_client = create_http_client(&config);

    // One keep-alive monitor per process.
    if let Some(store) = &store {
        let _monitor = KeepAliveMonitor::new(
            store.clone(),
            catalog.clone(),
            http_client.clone(),
            config.keepalive_check_interval_secs,
            config.clear_buffers,
        )
        .start();
    }

    let prompts = PromptStore::new(&config.prompts_dir);
    let hooks = HookRegistry::new()
        .with_auditor(Arc::new(llm_router_rust::services::hooks::TracingAuditor));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = Arc::new(AppState::new(
        config,
        catalog,
        chooser,
        http_client,
        prompts,
        hooks,
    ));

    let router = build_router(state)?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Shared HTTP client with connection pooling; the timeout covers the
/// upstream leg of every request.
fn create_http_client(config: &AppConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.external_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .expect("failed to build HTTP client")
}
