use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use nexus_common::model::TransactionStatus;
use nexus_common::pagination::{PageParams, Paged};
use nexus_common::perms::Permission;
use nexus_common::{Chain, NexusError};

use nexus_core::analytics::TopUsersBy;

use crate::auth::{authorize_project, AuthContext};
use crate::envelope::{ok, ok_paginated, ApiResult, RequestCtx};
use crate::routes::dto::TxLogDto;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OverviewQuery {
    pub days: Option<u32>,
}

pub async fn overview(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<OverviewQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;

    let days = query.days.unwrap_or(30).clamp(1, 365);
    let cache_key = format!("analytics:overview:{}:{}", project_id, days);
    let actor = auth.actor_id();
    if let Some(cached) = state.cache.get(&cache_key, &actor).await {
        return Ok(ok(&ctx, cached));
    }

    let report = state.analytics.overview(&project_id, days).map_err(|e| ctx.fail(e))?;
    let payload =
        serde_json::to_value(&report).map_err(|e| ctx.fail(NexusError::Internal(e.to_string())))?;
    state.cache.put(&cache_key, &actor, payload.clone()).await;
    Ok(ok(&ctx, payload))
}

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub chain: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn transactions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;

    let chain_filter = query
        .chain
        .as_deref()
        .map(|c| c.parse::<Chain>())
        .transpose()
        .map_err(|e| ctx.fail(e))?;
    let status_filter = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(TransactionStatus::Pending),
        Some("confirmed") => Some(TransactionStatus::Confirmed),
        Some("failed") => Some(TransactionStatus::Failed),
        Some("dropped") => Some(TransactionStatus::Dropped),
        Some(other) => {
            return Err(ctx.fail(NexusError::validation_field(
                "INVALID_STATUS",
                format!("unknown transaction status '{}'", other),
                "status",
            )))
        }
    };

    let mut logs = state
        .store
        .list_tx_logs(&project_id, query.from, query.to)
        .map_err(|e| ctx.fail(e))?;
    if let Some(chain) = chain_filter {
        logs.retain(|l| l.chain == chain);
    }
    if let Some(status) = status_filter {
        logs.retain(|l| l.status == status);
    }
    logs.reverse();

    let params = PageParams { page: query.page, limit: query.limit };
    let page = Paged::slice(&params, logs);
    let items: Vec<TxLogDto> = page.items.iter().map(TxLogDto::from).collect();
    Ok(ok_paginated(&ctx, items, page.meta))
}

#[derive(Deserialize)]
pub struct UsersQuery {
    pub by: Option<String>,
    pub limit: Option<usize>,
}

pub async fn users(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<UsersQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;

    let by = match query.by.as_deref() {
        None | Some("transactions") => TopUsersBy::Transactions,
        Some("gas") | Some("gasSpend") => TopUsersBy::GasSpend,
        Some(other) => {
            return Err(ctx.fail(NexusError::validation_field(
                "INVALID_SORT",
                format!("unknown ordering '{}'", other),
                "by",
            )
            .with_suggestions(&["order by 'transactions' or 'gas'"])))
        }
    };

    let top = state
        .analytics
        .top_users(&project_id, by, query.limit.unwrap_or(25))
        .map_err(|e| ctx.fail(e))?;
    let cohorts = state.analytics.cohorts(&project_id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "topUsers": top, "cohorts": cohorts })))
}

#[derive(Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn costs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    let rows = state.analytics.costs(&project_id, query.from, query.to).map_err(|e| ctx.fail(e))?;
    let daily = state
        .analytics
        .daily_metrics(&project_id, query.from, query.to, None)
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, json!({ "byChain": rows, "daily": daily })))
}

pub async fn export(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    let csv = state
        .analytics
        .export_csv(&project_id, query.from, query.to)
        .map_err(|e| ctx.fail(e))?;

    let mut response = (StatusCode::OK, csv).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"transactions.csv\""),
    );
    Ok(response)
}
