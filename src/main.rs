//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use loyalty_ledger::api::create_router;
use loyalty_ledger::app::{
    AppState, DispatcherConfig, LedgerService, WorkerConfig, pending_channel, spawn_dispatcher,
    spawn_worker,
};
use loyalty_ledger::domain::{AccrualProvider, Repositories};
use loyalty_ledger::infra::{
    AccrualClientConfig, HttpAccrualClient, PostgresClient, PostgresConfig,
};

/// Application configuration
struct Config {
    run_address: String,
    database_url: SecretString,
    accrual: AccrualClientConfig,
    dispatcher: DispatcherConfig,
    worker: WorkerConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URI").context("DATABASE_URI not set")?;
        let run_address = env::var("RUN_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let mut accrual = AccrualClientConfig::from_env()?;
        let worker = WorkerConfig::from_env()?;
        accrual.default_retry_after = worker.rate_limit_pause;

        Ok(Self {
            run_address,
            database_url: SecretString::from(database_url),
            accrual,
            dispatcher: DispatcherConfig::from_env()?,
            worker,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let json = env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Starting loyalty ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let postgres = Arc::new(
        PostgresClient::new(
            config.database_url.expose_secret(),
            PostgresConfig::default(),
        )
        .await?,
    );
    postgres.run_migrations().await?;
    let repos = Repositories::from_store(Arc::clone(&postgres));
    info!("   ✓ Database ready");

    let (pending, pending_rx) = pending_channel(config.worker.queue_capacity);

    let service = LedgerService::new(repos.clone(), pending);
    let (dispatcher, dispatcher_handle) = spawn_dispatcher(service, config.dispatcher.clone());
    info!(
        queue_capacity = config.dispatcher.queue_capacity,
        "   ✓ Task dispatcher started"
    );

    let worker_shutdown_tx = if config.worker.enabled {
        let accrual: Arc<dyn AccrualProvider> = Arc::new(HttpAccrualClient::new(config.accrual)?);
        let (worker_handle, shutdown_tx) =
            spawn_worker(repos.clone(), accrual, pending_rx, config.worker.clone());
        info!("   ✓ Reconciliation worker started");
        Some((worker_handle, shutdown_tx))
    } else {
        drop(pending_rx);
        info!("   ○ Reconciliation worker disabled");
        None
    };

    let app_state = Arc::new(AppState::new(dispatcher, Arc::clone(&repos.transactions)));
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.run_address).await?;
    info!("🚀 Server starting on http://{}", config.run_address);
    info!(
        "📄 OpenAPI spec at http://{}/api-docs/openapi.json",
        config.run_address
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last dispatcher handle; the consumer drains and exits.
    if let Err(e) = dispatcher_handle.await {
        tracing::warn!(error = %e, "Task dispatcher ended abnormally");
    }

    if let Some((handle, tx)) = worker_shutdown_tx {
        let _ = tx.send(true);
        let _ = handle.await;
    }

    info!("Server shutdown complete");
    Ok(())
}
