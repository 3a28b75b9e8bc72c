use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use nexus_common::pagination::{PageParams, Paged};
use nexus_common::perms::Permission;
use nexus_common::Chain;

use crate::auth::{authorize_project, AuthContext};
use crate::envelope::{ok, ok_paginated, ok_with_status, ApiResult, RequestCtx};
use crate::routes::dto::WalletDto;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletBody {
    pub social_id: String,
    pub social_type: String,
    pub chains: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateWalletBody>,
) -> ApiResult {
    let project = authorize_project(&state, &auth, &project_id, Permission::WalletsCreate, |r| {
        r.can_write()
    })
    .map_err(|e| ctx.fail(e))?;

    let chains = body
        .chains
        .map(|list| list.iter().map(|c| c.parse::<Chain>()).collect::<Result<Vec<_>, _>>())
        .transpose()
        .map_err(|e| ctx.fail(e))?;

    let wallet = state
        .wallets
        .create_wallet(&project, &body.social_id, &body.social_type, chains, body.metadata)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(ok_with_status(&ctx, StatusCode::CREATED, WalletDto::from(&wallet)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployWalletBody {
    pub wallet_id: String,
    pub chains: Vec<String>,
    /// Defaults to the project's paymaster setting.
    pub sponsored: Option<bool>,
}

pub async fn deploy(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Json(body): Json<DeployWalletBody>,
) -> ApiResult {
    let project = authorize_project(&state, &auth, &project_id, Permission::WalletsDeploy, |r| {
        r.can_write()
    })
    .map_err(|e| ctx.fail(e))?;

    let chains = body
        .chains
        .iter()
        .map(|c| c.parse::<Chain>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ctx.fail(e))?;
    let sponsored = body.sponsored.unwrap_or(project.settings.paymaster_enabled);

    let mut outcomes = Vec::with_capacity(chains.len());
    for chain in chains {
        let outcome = state
            .wallets
            .deploy(&project, &body.wallet_id, chain, sponsored)
            .await
            .map_err(|e| ctx.fail(e))?;
        if let Some(tx_hash) = &outcome.tx_hash {
            if outcome.status == nexus_common::model::DeployStatus::Pending {
                state.poller.enqueue_deploy(&project.id, &outcome.wallet_id, chain, tx_hash).await;
            }
        }
        outcomes.push(json!({
            "walletId": outcome.wallet_id,
            "chain": outcome.chain,
            "status": format!("{:?}", outcome.status).to_lowercase(),
            "txHash": outcome.tx_hash,
        }));
    }
    Ok(ok(&ctx, json!({ "deployments": outcomes })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path((project_id, wallet_id)): Path<(String, String)>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::WalletsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;
    let wallet = state.wallets.get_wallet(&project_id, &wallet_id).map_err(|e| ctx.fail(e))?;
    Ok(ok(&ctx, WalletDto::from(&wallet)))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub chain: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestCtx>,
    Extension(auth): Extension<AuthContext>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    authorize_project(&state, &auth, &project_id, Permission::WalletsRead, |r| r.can_read())
        .map_err(|e| ctx.fail(e))?;

    let chain_filter = query
        .chain
        .as_deref()
        .map(|c| c.parse::<Chain>())
        .transpose()
        .map_err(|e| ctx.fail(e))?;

    let mut wallets = state.wallets.list_wallets(&project_id).map_err(|e| ctx.fail(e))?;
    if let Some(chain) = chain_filter {
        wallets.retain(|w| w.addresses.contains_key(&chain));
    }
    let params = PageParams { page: query.page, limit: query.limit };
    let page = Paged::slice(&params, wallets);
    let items: Vec<WalletDto> = page.items.iter().map(WalletDto::from).collect();
    Ok(ok_paginated(&ctx, items, page.meta))
}
