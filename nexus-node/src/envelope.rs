use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use nexus_common::pagination::PageMeta;
use nexus_common::NexusError;

pub const API_VERSION: &str = "v1";

/// Per-request context set up by the pipeline and threaded through to the
/// envelope builders.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub request_id: String,
    pub started: std::time::Instant,
}

impl RequestCtx {
    pub fn new() -> Self {
        Self { request_id: nexus_common::id::request_id(), started: std::time::Instant::now() }
    }

    /// Attach this request's id to a service error.
    pub fn fail(&self, error: NexusError) -> ApiError {
        ApiError { error, request_id: self.request_id.clone() }
    }
}

impl Default for RequestCtx {
    fn default() -> Self {
        Self::new()
    }
}

fn meta(request_id: &str) -> serde_json::Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "requestId": request_id,
        "apiVersion": API_VERSION,
    })
}

/// `{success:true, data, meta}`.
pub fn ok<T: Serialize>(ctx: &RequestCtx, data: T) -> Response {
    Json(json!({ "success": true, "data": data, "meta": meta(&ctx.request_id) })).into_response()
}

pub fn ok_with_status<T: Serialize>(ctx: &RequestCtx, status: StatusCode, data: T) -> Response {
    let mut response = ok(ctx, data);
    *response.status_mut() = status;
    response
}

/// `{success:true, data, pagination, meta}`.
pub fn ok_paginated<T: Serialize>(ctx: &RequestCtx, items: Vec<T>, page: PageMeta) -> Response {
    Json(json!({
        "success": true,
        "data": items,
        "pagination": page,
        "meta": meta(&ctx.request_id),
    }))
    .into_response()
}

/// Error carrier for handlers; renders the standard error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub error: NexusError,
    pub request_id: String,
}

/// Error code attached to responses so the usage recorder can log it
/// without reparsing the body.
#[derive(Debug, Clone)]
pub struct ErrorCode(pub String);

impl From<NexusError> for ApiError {
    fn from(error: NexusError) -> Self {
        Self { error, request_id: nexus_common::id::request_id() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.error.code().to_string();

        // 5xx details never leak internals to the caller
        let message = if status.is_server_error() {
            tracing::error!(target: "api", request_id = %self.request_id, "{}", self.error);
            "an internal error occurred".to_string()
        } else {
            self.error.to_string()
        };

        let mut error_body = json!({ "code": code, "message": message });
        if let Some(field) = self.error.field() {
            error_body["field"] = json!(field);
        }
        if !self.error.suggestions().is_empty() {
            error_body["suggestions"] = json!(self.error.suggestions());
        }
        if let NexusError::RateLimited { retry_after_secs } = &self.error {
            error_body["details"] = json!({ "retryAfterSecs": retry_after_secs });
        }

        let mut response = (
            status,
            Json(json!({ "success": false, "error": error_body, "meta": meta(&self.request_id) })),
        )
            .into_response();
        response.extensions_mut().insert(ErrorCode(code));
        response
    }
}

pub type ApiResult = std::result::Result<Response, ApiError>;
