use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use nexus_common::model::PaymentStatus;
use nexus_common::pagination::{PageParams, Paged};
use nexus_common::perms::Permission;
use nexus_common::Chain;

use crate::auth::{authorize_project, AuthContext};
use crate::envelope::{ok, ApiResult, RequestCtx};
use crate::routes::dto::{BalanceDto, PaymasterDto, PaymentDto};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BalanceQuery {
    pub refresh: Option<bool>,
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;

    let force = query.refresh.unwrap_or(false);
    if force {
        // synchronous refreshes are expensive; one per project per minute
        let decision = state
            .limiter
            .check(&format!("refresh:{}", project_id), 1, std::time::Duration::from_secs(60))
            .await;
        if !decision.allowed {
            return Err(ctx.fail(nexus_common::NexusError::RateLimited {
                retry_after_secs: decision.reset_secs.max(1),
            }));
        }
    }
    let balances = state.paymasters.get_balances(&project_id, force).await.map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, balances.iter().map(BalanceDto::from).collect::<Vec<_>>()))
}

pub async fn addresses(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::AnalyticsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    let paymasters = state.paymasters.get_addresses(&project_id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, paymasters.iter().map(PaymasterDto::from).collect::<Vec<_>>()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundBody {
    pub chain: String,
    /// `deposit`, `card`, or `bank`.
    pub method: Option<String>,
    pub amount_usd: Option<f64>,
}

pub async fn fund(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<FundBody>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::PaymasterFund, |r| r.can_manage())
        .map_err(|e| ctx.fail(e))?;
    let chain = body.chain.parse::<Chain>().map_err(|e| ctx.fail(e))?;
    let instruction = state
        .paymasters
        .fund(
            &project_id,
            chain,
            body.method.as_deref().unwrap_or("deposit"),
            body.amount_usd,
            state.funding.as_ref(),
        )
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, instruction))
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
        Some("pending") => Some(PaymentStatus::Pending),
        Some("confirmed") => Some(PaymentStatus::Confirmed),
        Some("failed") => Some(PaymentStatus::Failed),
        Some(other) => {
            return Err(ctx.fail(nexus_common::NexusError::validation_field(
                "INVALID_STATUS",
                format!("unknown payment status '{}'", other),
                "status",
            )))
        }
    };

    let mut payments = state
        .store
        .list_payments(&project_id, query.from, query.to)
        .map_err(|e| ctx.fail(e))?;
    if let Some(chain) = chain_filter {
        payments.retain(|p| p.chain == chain);
    }
    if let Some(status) = status_filter {
        payments.retain(|p| p.status == status);
    }
    // newest first for the dashboard
    payments.reverse();

    let totals = state.paymasters.total_spent(&project_id).map_err(|e| ctx.fail(e))?;
    let params = PageParams { page: query.page, limit: query.limit };
    let page = Paged::slice(&params, payments);
    Ok(ok(
        &ctx,
        json!({
            "payments": page.items.iter().map(PaymentDto::from).collect::<Vec<_>>(),
            "totalsWei": totals
                .iter()
                .map(|(chain, wei)| json!({ "chain": chain, "totalWei": wei.to_string() }))
                .collect::<Vec<_>>(),
            "pagination": page.meta,
        }),
    ))
}
