pub mod analytics;
pub mod auth_routes;
pub mod dto;
pub mod keys;
pub mod paymaster;
pub mod projects;
pub mod wallets;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use nexus_common::NexusError;

use crate::auth::{authenticate, client_ip, context_middleware, rate_limit, record_usage};
use crate::envelope::{ok, RequestCtx};
use crate::ratelimit::{AUTH_LIMIT, AUTH_WINDOW, RESET_LIMIT, RESET_WINDOW};
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let auth_api = Router::new()
        .route("/v1/auth/register", post(auth_routes::register))
        .route("/v1/auth/login", post(auth_routes::login))
        .route("/v1/auth/oauth", post(auth_routes::oauth_login))
        .route("/v1/auth/verify-email", post(auth_routes::verify_email))
        .route("/v1/auth/reset-password", post(auth_routes::reset_password))
        .layer(from_fn_with_state(state.clone(), auth_ip_limit));

    let session_api = Router::new()
        .route("/v1/auth/profile", get(auth_routes::get_profile).put(auth_routes::update_profile))
        .layer(from_fn_with_state(state.clone(), authenticate));

    let project_api = Router::new()
        .route("/v1/projects", get(projects::list).post(projects::create))
        .route(
            "/v1/projects/{project_id}",
            get(projects::get_one).put(projects::update).delete(projects::delete),
        )
        .route("/v1/projects/{project_id}/transfer-ownership", post(projects::transfer_ownership))
        .route(
            "/v1/projects/{project_id}/members",
            get(projects::list_members).post(projects::invite_member),
        )
        .route(
            "/v1/projects/{project_id}/members/{user_id}",
            axum::routing::put(projects::update_member).delete(projects::remove_member),
        )
        .route("/v1/projects/{project_id}/api-keys", get(keys::list).post(keys::create))
        .route(
            "/v1/projects/{project_id}/api-keys/{key_id}",
            axum::routing::put(keys::update).delete(keys::revoke),
        )
        .route("/v1/projects/{project_id}/api-keys/{key_id}/rotate", post(keys::rotate))
        .route("/v1/projects/{project_id}/api-keys/{key_id}/usage", get(keys::usage))
        .route("/v1/projects/{project_id}/wallets", get(wallets::list))
        .route("/v1/projects/{project_id}/wallets/create", post(wallets::create))
        .route("/v1/projects/{project_id}/wallets/deploy", post(wallets::deploy))
        .route("/v1/projects/{project_id}/wallets/{wallet_id}", get(wallets::get_one))
        .route("/v1/projects/{project_id}/paymaster/balance", get(paymaster::balance))
        .route("/v1/projects/{project_id}/paymaster/addresses", get(paymaster::addresses))
        .route("/v1/projects/{project_id}/paymaster/fund", post(paymaster::fund))
        .route("/v1/projects/{project_id}/paymaster/transactions", get(paymaster::transactions))
        .route("/v1/projects/{project_id}/analytics/overview", get(analytics::overview))
        .route("/v1/projects/{project_id}/analytics/transactions", get(analytics::transactions))
        .route("/v1/projects/{project_id}/analytics/users", get(analytics::users))
        .route("/v1/projects/{project_id}/analytics/costs", get(analytics::costs))
        .route("/v1/projects/{project_id}/analytics/export", get(analytics::export))
        .layer(from_fn_with_state(state.clone(), record_usage))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/v1/health", get(health))
        .merge(auth_api)
        .merge(session_api)
        .merge(project_api)
        .layer(from_fn(context_middleware))
        .layer(cors_layer(&state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, HeaderName::from_static("x-api-key")]);
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        // tight by default: no cross-origin callers
        layer
    } else {
        layer.allow_origin(origins)
    }
}

async fn health(State(state): State<AppState>, Extension(ctx): Extension<RequestCtx>) -> Response {
    ok(
        &ctx,
        json!({
            "status": "ok",
            "environment": state.config.environment.to_string(),
            "pendingReceipts": state.poller.depth().await,
            "droppedUsageRows": state.usage.dropped_count(),
        }),
    )
}

/// IP-keyed limits on the unauthenticated auth surface: 10 per 15 minutes,
/// and 3 per hour for password resets.
async fn auth_ip_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ctx = req.extensions().get::<RequestCtx>().cloned().unwrap_or_default();
    let ip = client_ip(req.headers()).unwrap_or_else(|| "local".to_string());

    let decision = if req.uri().path().ends_with("/reset-password") {
        state.limiter.check(&format!("ip:{}:reset", ip), RESET_LIMIT, RESET_WINDOW).await
    } else {
        state.limiter.check(&format!("ip:{}:auth", ip), AUTH_LIMIT, AUTH_WINDOW).await
    };

    if !decision.allowed {
        return ctx
            .fail(NexusError::RateLimited { retry_after_secs: decision.reset_secs.max(1) })
            .into_response();
    }
    next.run(req).await
}

