use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use nexus_common::model::{ApiKey, ApiKeyUsage, Project, ProjectRole, User};
use nexus_common::perms::{grant_allows, Permission};
use nexus_common::{id, NexusError};

use crate::envelope::{ErrorCode, RequestCtx};
use crate::ratelimit::{HOUR, KEY_LIMIT_PER_HOUR, PROJECT_LIMIT_PER_HOUR};
use crate::state::AppState;

/// In-process sentinels accepted only outside production; they bypass key
/// lookup and grant the full permission set.
const DEV_SENTINELS: [&str; 3] = ["local-dev-key", "dev-key", "development-key"];

/// Outcome of the authenticator stage, attached to the request.
#[derive(Clone)]
pub enum AuthContext {
    Session { user: User },
    ApiKey { key: ApiKey, project: Project },
    DevKey,
}

impl AuthContext {
    /// Stable identity for cache scoping and logs.
    pub fn actor_id(&self) -> String {
        match self {
            AuthContext::Session { user } => user.id.clone(),
            AuthContext::ApiKey { key, .. } => key.id.clone(),
            AuthContext::DevKey => "dev-key".to_string(),
        }
    }
}

/// Outermost pipeline stage: request id, timing, security headers.
pub async fn context_middleware(mut req: Request, next: Next) -> Response {
    let ctx = RequestCtx::new();
    req.extensions_mut().insert(ctx.clone());
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert("x-request-id", value);
    }
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    response
}

/// Exactly one authenticator must succeed: bearer session JWT, or a
/// project API key from `X-API-Key` / `?apikey=`.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let ctx = req.extensions().get::<RequestCtx>().cloned().unwrap_or_default();
    match resolve_auth(&state, &req) {
        Ok(auth) => {
            req.extensions_mut().insert(auth);
            next.run(req).await
        }
        Err(e) => ctx.fail(e).into_response(),
    }
}

fn resolve_auth(state: &AppState, req: &Request) -> Result<AuthContext, NexusError> {
    let headers = req.headers();

    if let Some(token) = bearer_token(headers) {
        let user = state.identity.validate_jwt(token)?;
        return Ok(AuthContext::Session { user });
    }

    if let Some(presented) = presented_api_key(req) {
        if !state.config.environment.is_production() && DEV_SENTINELS.contains(&presented.as_str()) {
            return Ok(AuthContext::DevKey);
        }
        let ip = client_ip(headers);
        let auth = state
            .keys
            .authenticate(&presented, ip.as_deref(), state.config.environment)?;
        return Ok(AuthContext::ApiKey { key: auth.key, project: auth.project });
    }

    Err(NexusError::auth("UNAUTHORIZED", "provide a bearer token or an X-API-Key header"))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn presented_api_key(req: &Request) -> Option<String> {
    if let Some(header) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !header.is_empty() {
            return Some(header.to_string());
        }
    }
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == "apikey" && !value.is_empty()).then(|| value.to_string())
        })
    })
}

/// Caller IP from proxy headers; the bind address is not interesting
/// behind a load balancer.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers.get("x-real-ip").and_then(|v| v.to_str().ok()).map(|v| v.to_string())
        })
        .filter(|v| !v.is_empty())
}

/// Sliding-window limits for API-key traffic: per key, per project, and the
/// project's own per-minute setting. Dev keys and sessions skip this stage.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ctx = req.extensions().get::<RequestCtx>().cloned().unwrap_or_default();
    let Some(AuthContext::ApiKey { key, project }) = req.extensions().get::<AuthContext>().cloned()
    else {
        return next.run(req).await;
    };

    // one joint decision: a request rejected by any window consumes
    // budget in none of them
    let probes = [
        (format!("key:{}", key.id), KEY_LIMIT_PER_HOUR, HOUR),
        (format!("proj:{}", project.id), PROJECT_LIMIT_PER_HOUR, HOUR),
        (
            format!("proj-min:{}", project.id),
            project.settings.rate_limit_per_minute,
            std::time::Duration::from_secs(60),
        ),
    ];
    let (admitted, decisions) = state.limiter.check_all(&probes).await;

    if !admitted {
        let rejected = decisions
            .iter()
            .find(|d| !d.allowed)
            .copied()
            .unwrap_or(decisions[0]);
        let mut response = ctx
            .fail(NexusError::RateLimited { retry_after_secs: rejected.reset_secs.max(1) })
            .into_response();
        set_rate_headers(&mut response, rejected.limit, 0, rejected.reset_secs);
        return response;
    }

    let tightest = decisions
        .iter()
        .min_by_key(|d| d.remaining)
        .copied()
        .unwrap_or(decisions[0]);
    let mut response = next.run(req).await;
    set_rate_headers(&mut response, tightest.limit, tightest.remaining, tightest.reset_secs);
    response
}

fn set_rate_headers(response: &mut Response, limit: u32, remaining: u32, reset_secs: u64) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_secs.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
}

/// Post-dispatch usage recording for API-key requests. Fire-and-forget
/// through the bounded queue; never gates the response.
pub async fn record_usage(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(AuthContext::ApiKey { key, project }) = req.extensions().get::<AuthContext>().cloned()
    else {
        return next.run(req).await;
    };

    let started = Instant::now();
    let method = req.method().to_string();
    let endpoint = req.uri().path().to_string();
    let ip = client_ip(req.headers()).unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let request_size = content_length(req.headers());

    let response = next.run(req).await;

    let status_code = response.status().as_u16();
    let error_message = (status_code >= 400)
        .then(|| response.extensions().get::<ErrorCode>().map(|c| c.0.clone()))
        .flatten();

    state
        .usage
        .record(ApiKeyUsage {
            usage_id: id::usage_id(),
            api_key_id: key.id,
            project_id: project.id,
            endpoint,
            method,
            status_code,
            response_time_ms: started.elapsed().as_millis() as u64,
            ip_address: ip,
            user_agent,
            request_size,
            response_size: content_length(response.headers()),
            error_message,
            created_at: Utc::now(),
        })
        .await;

    response
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Project scoping + permission gate, called by every project handler.
/// API keys must name the path project and carry the declared permission;
/// sessions must pass the role predicate; dev keys see everything.
pub fn authorize_project(
    state: &AppState,
    auth: &AuthContext,
    project_id: &str,
    permission: Permission,
    role_check: fn(ProjectRole) -> bool,
) -> Result<Project, NexusError> {
    match auth {
        AuthContext::DevKey => state.projects.get_project(project_id),
        AuthContext::ApiKey { key, project } => {
            if project.id != project_id {
                return Err(NexusError::forbidden(
                    "PROJECT_MISMATCH",
                    "API key does not belong to this project",
                ));
            }
            if !grant_allows(&key.permissions, permission) {
                return Err(NexusError::forbidden(
                    "INSUFFICIENT_PERMISSIONS",
                    format!("this key lacks the '{}' permission", permission),
                ));
            }
            Ok(project.clone())
        }
        AuthContext::Session { user } => {
            let project = state.projects.get_project(project_id)?;
            state.projects.require_role(&project, &user.id, role_check)?;
            Ok(project)
        }
    }
}
