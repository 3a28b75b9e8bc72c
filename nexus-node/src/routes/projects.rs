use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use nexus_common::model::ProjectRole;
use nexus_common::perms::Permission;
use nexus_common::{Chain, NexusError};

use crate::auth::{authorize_project, AuthContext};
use crate::envelope::{ok, ok_with_status, ApiError, ApiResult, RequestCtx};
use crate::routes::dto::{MemberDto, ProjectDto};
use crate::state::AppState;

fn session_user(ctx: &RequestCtx, auth: &AuthContext) -> Result<nexus_common::model::User, ApiError> {
    match auth {
        AuthContext::Session { user } => Ok(user.clone()),
        _ => Err(ctx.fail(NexusError::auth("UNAUTHORIZED", "this route requires a session token"))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectBody {
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub chains: Vec<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateProjectBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let chains = body
        .chains
        .iter()
        .map(|c| c.parse::<Chain>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ctx.fail(e))?;
    let project = state
        .projects
        .create_project(&user, &body.name, body.description, body.website, chains)
        .map_err(|e| ctx.fail(e))?;
    state.cache.invalidate_user(&user.id).await;
    Ok(ok_with_status(&ctx, StatusCode::CREATED, ProjectDto::from(&project)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    if let Some(cached) = state.cache.get("projects", &user.id).await {
        return Ok(ok(&ctx, cached));
    }
    let projects = state.projects.list_projects(&user.id).map_err(|e| ctx.fail(e))?;
    let payload = serde_json::to_value(projects.iter().map(ProjectDto::from).collect::<Vec<_>>())
        .map_err(|e| ctx.fail(NexusError::Internal(e.to_string())))?;
    state.cache.put("projects", &user.id, payload.clone()).await;
    Ok(ok(&ctx, payload))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let project = authorize_project(&state, &auth, &project_id, Permission::WalletsRead, |r| {
        r.can_read()
    })
    .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, ProjectDto::from(&project)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub webhook_url: Option<String>,
    pub paymaster_enabled: Option<bool>,
    pub rate_limit_per_minute: Option<u32>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProjectBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let project = state
        .projects
        .update_project(
            &project_id,
            &user.id,
            body.name,
            body.description,
            body.website,
            body.webhook_url,
            body.paymaster_enabled,
            body.rate_limit_per_minute,
        )
        .map_err(|e| ctx.fail(e))?;
    state.cache.invalidate_user(&user.id).await;
    Ok(ok(&ctx, ProjectDto::from(&project)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    state.projects.delete_project(&project_id, &user.id).map_err(|e| ctx.fail(e))?;
    state.cache.invalidate_user(&user.id).await;
    Ok(ok(&ctx, json!({ "deleted": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub new_owner_id: String,
}

pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<TransferBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let project = state
        .projects
        .transfer_ownership(&project_id, &user.id, &body.new_owner_id)
        .map_err(|e| ctx.fail(e))?;
    state.cache.invalidate_user(&user.id).await;
    Ok(ok(&ctx, ProjectDto::from(&project)))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let members = state.projects.list_members(&project_id, &user.id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, members.iter().map(MemberDto::from).collect::<Vec<_>>()))
}

fn parse_role(ctx: &RequestCtx, role: &str) -> Result<ProjectRole, ApiError> {
    match role {
        "admin" => Ok(ProjectRole::Admin),
        "developer" => Ok(ProjectRole::Developer),
        "viewer" => Ok(ProjectRole::Viewer),
        other => Err(ctx.fail(
            NexusError::validation_field(
                "INVALID_ROLE",
                format!("unknown role '{}'", other),
                "role",
            )
            .with_suggestions(&["assignable roles: admin, developer, viewer"]),
        )),
    }
}

#[derive(Deserialize)]
pub struct InviteBody {
    pub email: String,
    pub role: String,
}

pub async fn invite_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<InviteBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let role = parse_role(&ctx, &body.role)?;
    let member = state
        .projects
        .invite_member(&project_id, &user.id, &body.email, role)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ok_with_status(&ctx, StatusCode::CREATED, MemberDto::from(&member)))
}

#[derive(Deserialize)]
pub struct UpdateMemberBody {
    pub role: String,
}

pub async fn update_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, member_user_id)): Path<(String, String)>,
    Json(body): Json<UpdateMemberBody>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    let role = parse_role(&ctx, &body.role)?;
    let member = state
        .projects
        .update_member_role(&project_id, &user.id, &member_user_id, role)
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, MemberDto::from(&member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, member_user_id)): Path<(String, String)>,
) -> ApiResult {
    let user = session_user(&ctx, &auth)?;
    state
        .projects
        .remove_member(&project_id, &user.id, &member_user_id)
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "removed": true })))
}
