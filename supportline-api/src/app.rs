/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
/// Every mutating route is wrapped in the admission layer with the
/// write action it performs; read routes skip it.

use crate::admission::{AdmissionService, WriteAction};
use crate::config::Config;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use supportline_shared::ai::ReplyGenerator;
use supportline_shared::models::plan::PlanSource;
use supportline_shared::models::tenant::TenantStore;
use supportline_shared::models::usage::UsageStore;
use supportline_shared::ratelimit::LoginRateLimiter;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning. Everything behind a trait object
/// so the whole router can run against in-memory stores in tests; `db` is
/// `None` in that configuration and the health check reports it.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, absent when running storeless in tests
    pub db: Option<PgPool>,

    /// The admission gate chain
    pub admission: Arc<AdmissionService>,

    /// Login-attempt throttle for the auth routes
    pub login_limiter: Arc<LoginRateLimiter>,

    /// Tenant lookups for read routes
    pub tenants: Arc<dyn TenantStore>,

    /// Usage ledger reads for the usage routes
    pub usage: Arc<dyn UsageStore>,

    /// Plan resolution for the usage routes
    pub plans: Arc<dyn PlanSource>,

    /// AI reply provider
    pub reply_generator: Arc<dyn ReplyGenerator>,

    /// Application configuration
    pub config: Arc<Config>,
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # Health check (public)
/// ├── /v1/
/// │   ├── POST /auth/login             # Login (login throttle only)
/// │   ├── POST /conversations          # Create conversation (admission)
/// │   ├── POST /messages               # Send human message (admission)
/// │   ├── POST /messages/ai-reply      # Generate AI reply (admission, M2)
/// │   ├── POST /automation/touch       # Automation visitor touch (M3)
/// │   └── GET  /usage                  # Current-month usage + AI allowance
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
/// 3. Admission / login throttle (per-route basis)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/login", post(routes::auth::login))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::login_rate_limit_layer,
        ));

    let conversation_routes = Router::new()
        .route("/", post(routes::writes::create_conversation))
        .layer(axum::middleware::from_fn_with_state(
            (state.clone(), WriteAction::CreateConversation),
            crate::middleware::admission::admission_layer,
        ));

    let message_routes = Router::new()
        .route("/", post(routes::writes::send_message))
        .layer(axum::middleware::from_fn_with_state(
            (state.clone(), WriteAction::SendHumanMessage),
            crate::middleware::admission::admission_layer,
        ))
        .merge(
            Router::new()
                .route("/ai-reply", post(routes::writes::generate_ai_reply))
                .layer(axum::middleware::from_fn_with_state(
                    (state.clone(), WriteAction::GenerateAiReply),
                    crate::middleware::admission::admission_layer,
                )),
        );

    // Automation carries its visitor key in the body, so its handler runs
    // the gate chain itself instead of going through the layer.
    let automation_routes = Router::new().route("/touch", post(routes::writes::automation_touch));

    let usage_routes = Router::new().route("/", get(routes::usage::get_usage));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/conversations", conversation_routes)
        .nest("/messages", message_routes)
        .nest("/automation", automation_routes)
        .nest("/usage", usage_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.contains(&"*".to_string()) {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
