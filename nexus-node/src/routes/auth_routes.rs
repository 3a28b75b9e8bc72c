use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use nexus_common::NexusError;

use crate::auth::AuthContext;
use crate::envelope::{ok, ok_with_status, ApiResult, RequestCtx};
use crate::routes::dto::UserDto;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub email: String,
    pub password: String,
    pub name: String,
    pub company: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<RegisterBody>,
) -> ApiResult {
    let user = state
        .identity
        .register(&body.email, &body.password, &body.name, body.company)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ok_with_status(
        &ctx,
        StatusCode::CREATED,
        json!({
            "user": UserDto::from(&user),
            "message": "check your inbox for a verification link",
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<LoginBody>,
) -> ApiResult {
    let (user, token) = state.identity.login(&body.email, &body.password).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "token": token, "user": UserDto::from(&user) })))
}

/// OAuth sign-in: the provider exchange happens upstream; the core trusts
/// the (provider, oauthId, email) triple it is handed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthBody {
    pub provider: String,
    pub oauth_id: String,
    pub email: String,
    pub name: String,
}

pub async fn oauth_login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<OauthBody>,
) -> ApiResult {
    let (user, token) = state
        .identity
        .oauth_login(&body.provider, &body.oauth_id, &body.email, &body.name)
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "token": token, "user": UserDto::from(&user) })))
}

#[derive(Deserialize)]
pub struct VerifyBody {
    pub token: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<VerifyBody>,
) -> ApiResult {
    let user = state.identity.verify_email(&body.token).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "user": UserDto::from(&user) })))
}

/// One route, two modes: `{email}` requests a reset mail, `{token,
/// newPassword}` consumes the token.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    pub email: Option<String>,
    pub token: Option<String>,
    pub new_password: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<ResetBody>,
) -> ApiResult {
    match (body.email, body.token, body.new_password) {
        (Some(email), None, None) => {
            state.identity.request_password_reset(&email).await.map_err(|e| ctx.fail(e))?;
            Ok(ok(&ctx, json!({ "message": "if that address exists, a reset link is on its way" })))
        }
        (None, Some(token), Some(new_password)) => {
            let user = state.identity.reset_password(&token, &new_password).map_err(|e| ctx.fail(e))?;
            Ok(ok(&ctx, json!({ "user": UserDto::from(&user) })))
        }
        _ => Err(ctx.fail(NexusError::validation(
            "INVALID_BODY",
            "send either {email} or {token, newPassword}",
        ))),
    }
}

fn session_user(ctx: &RequestCtx, auth: &AuthContext) -> Result<nexus_common::model::User, crate::envelope::ApiError> {
    match auth {
        AuthContext::Session { user } => Ok(user.clone()),
        _ => Err(ctx.fail(NexusError::auth("UNAUTHORIZED", "this route requires a session token"))),
    }
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;

    if let Some(cached) = state.cache.get("profile", &user.id).await {
        return Ok(ok(&ctx, cached));
    }
    let fresh = state.identity.get_profile(&user.id).map_err(|e| ctx.fail(e))?;
    let payload = serde_json::to_value(UserDto::from(&fresh))
        .map_err(|e| ctx.fail(NexusError::Internal(e.to_string())))?;
    state.cache.put("profile", &user.id, payload.clone()).await;
    Ok(ok(&ctx, payload))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBody {
    pub name: Option<String>,
    pub company: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<ProfileBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let updated = state
        .identity
        .update_profile(&user.id, body.name, body.company)
        .map_err(|e| ctx.fail(e))?;
    state.cache.invalidate_user(&user.id).await;
    Ok(ok(&ctx, UserDto::from(&updated)))
}
