use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use nexus_common::model::{ApiKeyType, IpAllowEntry};
use nexus_common::pagination::{PageParams, Paged};
use nexus_common::perms::Permission;
use nexus_common::NexusError;

use crate::auth::{authorize_project, AuthContext};
use crate::envelope::{ok, ok_paginated, ok_with_status, ApiResult, RequestCtx};
use crate::routes::dto::ApiKeyDto;
use crate::state::AppState;

fn actor_id(auth: &AuthContext) -> String {
    match auth {
        AuthContext::Session { user } => user.id.clone(),
        AuthContext::ApiKey { key, .. } => key.created_by.clone(),
        AuthContext::DevKey => "dev-key".to_string(),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AdminAll, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    let keys = state.keys.list_keys(&project_id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, keys.iter().map(ApiKeyDto::from).collect::<Vec<_>>()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyBody {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub ip_allowlist: Option<Vec<AllowEntryBody>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct AllowEntryBody {
    pub ip: String,
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateKeyBody>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AdminAll, |r| r.can_write())
        .map_err(|e| ctx.fail(e))?;

    let key_type = match body.key_type.as_deref() {
        None => ApiKeyType::Dev,
        Some(raw) => ApiKeyType::parse(raw).ok_or_else(|| {
            ctx.fail(
                NexusError::validation_field(
                    "INVALID_KEY_TYPE",
                    format!("unknown key type '{}'", raw),
                    "type",
                )
                .with_suggestions(&["valid types: dev, production, restricted"]),
            )
        })?,
    };
    let permissions = body
        .permissions
        .map(|list| list.iter().map(|p| p.parse::<Permission>()).collect::<Result<Vec<_>, _>>())
        .transpose()
        .map_err(|e| ctx.fail(e))?;
    let allowlist = body
        .ip_allowlist
        .unwrap_or_default()
        .into_iter()
        .map(|e| IpAllowEntry { ip: e.ip, description: e.description, added_at: Utc::now() })
        .collect();

    let (record, plaintext) = state
        .keys
        .create_key(
            &project_id,
            &actor_id(&auth),
            &body.name,
            key_type,
            permissions,
            allowlist,
            body.expires_at,
        )
        .map_err(|e| ctx.fail(e))?;

    // the plaintext appears exactly once, here
    Ok(ok_with_status(
        &ctx,
        StatusCode::CREATED,
        json!({ "key": plaintext, "record": ApiKeyDto::from(&record) }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyBody {
    pub add_ips: Option<Vec<AllowEntryBody>>,
    pub remove_ips: Option<Vec<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, key_id)): Path<(String, String)>,
    Json(body): Json<UpdateKeyBody>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AdminAll, |r| r.can_manage())
        .map_err(|e| ctx.fail(e))?;
    let add = body
        .add_ips
        .unwrap_or_default()
        .into_iter()
        .map(|e| IpAllowEntry { ip: e.ip, description: e.description, added_at: Utc::now() })
        .collect();
    let key = state
        .keys
        .update_allowlist(&project_id, &key_id, add, body.remove_ips.unwrap_or_default())
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, ApiKeyDto::from(&key)))
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, key_id)): Path<(String, String)>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AdminAll, |r| r.can_manage())
        .map_err(|e| ctx.fail(e))?;
    let key = state.keys.revoke_key(&project_id, &key_id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, ApiKeyDto::from(&key)))
}

pub async fn rotate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, key_id)): Path<(String, String)>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AdminAll, |r| r.can_manage())
        .map_err(|e| ctx.fail(e))?;
    let (new_key, plaintext, old_key) =
        state.keys.rotate_key(&project_id, &key_id, &actor_id(&auth)).map_err(|e| ctx.fail(e))?;

    state
        .webhooks
        .send(
            &project_id,
            nexus_core::WebhookEvent::ApiKeyRotated {
                old_key_id: old_key.id.clone(),
                new_key_id: new_key.id.clone(),
                grace_hours: nexus_core::apikey::ROTATION_GRACE_HOURS,
            },
        )
        .await;

    Ok(ok(
        &ctx,
        json!({
            "key": plaintext,
            "record": ApiKeyDto::from(&new_key),
            "rotated": ApiKeyDto::from(&old_key),
        }),
    ))
}

#[derive(Deserialize)]
pub struct UsageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, key_id)): Path<(String, String)>,
    Query(query): Query<UsageQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    // scope check: the key must belong to this project
    state.keys.get_key(&project_id, &key_id).map_err(|e| ctx.fail(e))?;

    let rows = state
        .store
        .list_usage_for_key(&key_id, query.from, query.to)
        .map_err(|e| ctx.fail(e))?;
    let params = PageParams { page: query.page, limit: query.limit };
    let page = Paged::slice(&params, rows);
    let items: Vec<serde_json::Value> = page
        .items
        .iter()
        .map(|u| {
            json!({
                "usageId": u.usage_id,
                "endpoint": u.endpoint,
                "method": u.method,
                "statusCode": u.status_code,
                "responseTimeMs": u.response_time_ms,
                "ipAddress": u.ip_address,
                "errorMessage": u.error_message,
                "createdAt": u.created_at,
            })
        })
        .collect();
    Ok(ok_paginated(&ctx, items, page.meta))
}
