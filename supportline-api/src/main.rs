//! # Supportline API Server
//!
//! Main entry point: loads configuration, connects Postgres and Redis, runs
//! migrations, wires the admission gate chain, and serves the router.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p supportline-api
//! ```

use std::sync::Arc;
use std::time::Duration;

use supportline_api::admission::{AdmissionService, AdmissionSettings};
use supportline_api::app::{build_router, AppState};
use supportline_api::config::Config;
use supportline_shared::ai::MockReplyGenerator;
use supportline_shared::billing::BillingGuard;
use supportline_shared::db::migrations::run_migrations;
use supportline_shared::db::pool::{create_pool, DatabaseConfig};
use supportline_shared::models::plan::PgPlanSource;
use supportline_shared::models::tenant::PgTenantStore;
use supportline_shared::models::usage::PgUsageStore;
use supportline_shared::quota::QuotaEvaluator;
use supportline_shared::ratelimit::{FixedWindowLimiter, LoginRateLimiter};
use supportline_shared::redis::{RedisClient, RedisConfig, RedisCounterStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supportline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Supportline API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await?;
    run_migrations(&pool).await?;

    let redis = RedisClient::new(RedisConfig {
        url: config.redis_url.clone(),
        command_timeout_secs: 2,
    })
    .await?;
    let counter_store = Arc::new(RedisCounterStore::new(redis));

    let tenants = Arc::new(PgTenantStore::new(pool.clone()));
    let usage = Arc::new(PgUsageStore::new(pool.clone()));
    let plans = Arc::new(PgPlanSource::new(pool.clone()));

    let limiter = FixedWindowLimiter::new(counter_store.clone())
        .with_multiplier(config.rate_limit_multiplier());
    let login_limiter = Arc::new(LoginRateLimiter::new(
        counter_store,
        config.rate_limit.login_per_window,
        Duration::from_secs(300),
    ));

    let admission = Arc::new(AdmissionService::new(
        limiter,
        BillingGuard::new(tenants.clone()),
        QuotaEvaluator::new(plans.clone(), usage.clone()),
        tenants.clone(),
        usage.clone(),
        AdmissionSettings {
            rate_limit: config.rate_limit.per_minute,
            rate_window: Duration::from_secs(60),
            operator_overrides_kill_switch: false,
        },
    ));

    let state = AppState {
        db: Some(pool),
        admission,
        login_limiter,
        tenants,
        usage,
        plans,
        reply_generator: Arc::new(MockReplyGenerator::default()),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("Server listening on http://{}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    }
    tracing::info!("Shutdown signal received");
}
