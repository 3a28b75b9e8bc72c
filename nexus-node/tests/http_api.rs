use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use nexus_common::Environment;
use nexus_node::routes::build_router;
use nexus_node::{AppState, Config};
use nexus_store::Store;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".into(),
        database_path: dir.path().join("nexus.redb"),
        environment: Environment::Development,
        jwt_secret: "test-jwt-secret".into(),
        encryption_key_hex: hex::encode([7u8; 32]),
        master_secret_hex: hex::encode([42u8; 32]),
        webhook_secret: "test-webhook-secret".into(),
        price_oracle_url: None,
        price_oracle_key: None,
        cors_origins: vec![],
        use_mock_chains: true,
    }
}

fn app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(Store::open(&config.database_path).unwrap());
    let state = AppState::build(config, store).unwrap();
    (dir, build_router(state))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_bearer(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn register_and_login(router: &Router, email: &str) -> String {
    let (status, _) = send(
        router,
        post_json(
            "/v1/auth/register",
            json!({ "email": email, "password": "P@ssw0rd1", "name": "Test User" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        router,
        post_json("/v1/auth/login", json!({ "email": email, "password": "P@ssw0rd1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["token"].as_str().unwrap().to_string()
}

async fn create_project(router: &Router, token: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/projects")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "name": "DeFi App", "chains": ["ethereum"] }).to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_speaks_the_envelope() {
    let (_dir, router) = app();
    let (status, body) =
        send(&router, Request::builder().uri("/v1/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["status"], json!("ok"));
    assert!(body["meta"]["requestId"].as_str().unwrap().starts_with("req_"));
}

#[tokio::test]
async fn project_routes_require_credentials() {
    let (_dir, router) = app();
    let (status, body) =
        send(&router, Request::builder().uri("/v1/projects").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));
}

#[tokio::test]
async fn register_login_create_project_flow() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let (status, body) =
        send(&router, get_bearer(&format!("/v1/projects/{}", project_id), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], json!("defi-app"));
    assert_eq!(body["data"]["chains"], json!(["ethereum"]));
}

#[tokio::test]
async fn api_key_permissions_gate_routes() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    // key with read+create but no deploy
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/api-keys", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(
            Body::from(
                json!({
                    "name": "server",
                    "type": "production",
                    "permissions": ["wallets:create", "wallets:read"],
                })
                .to_string(),
            ),
        )
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let plaintext = body["data"]["key"].as_str().unwrap().to_string();
    assert!(plaintext.starts_with(&format!("npay_proj_{}_", project_id)));
    // at-rest record only carries the preview
    assert!(body["data"]["record"]["keyPreview"].as_str().unwrap().contains("..."));

    // read passes
    let request = Request::builder()
        .uri(format!("/v1/projects/{}/wallets", project_id))
        .header("x-api-key", &plaintext)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], json!(0));

    // deploy is denied
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/wallets/deploy", project_id))
        .header("content-type", "application/json")
        .header("x-api-key", &plaintext)
        .body(Body::from(json!({ "walletId": "wal_x", "chains": ["ethereum"] }).to_string()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("INSUFFICIENT_PERMISSIONS"));
}

#[tokio::test]
async fn wallet_create_and_deploy_over_http() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/wallets/create", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "socialId": "bob@x.io", "socialType": "email" }).to_string()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let wallet_id = body["data"]["id"].as_str().unwrap().to_string();
    let address = body["data"]["addresses"]["ethereum"].as_str().unwrap().to_string();
    assert!(address.starts_with("0x"));

    // repeat create returns the same wallet
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/wallets/create", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "socialId": "bob@x.io", "socialType": "email" }).to_string()))
        .unwrap();
    let (_, body) = send(&router, request).await;
    assert_eq!(body["data"]["id"], json!(wallet_id));
    assert_eq!(body["data"]["addresses"]["ethereum"], json!(address));

    // unsponsored deploy goes pending with a tx hash
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/wallets/deploy", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(
            Body::from(
                json!({ "walletId": wallet_id, "chains": ["ethereum"], "sponsored": false })
                    .to_string(),
            ),
        )
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deployments"][0]["status"], json!("pending"));
    assert!(body["data"]["deployments"][0]["txHash"].as_str().is_some());
}

#[tokio::test]
async fn dev_sentinel_key_works_outside_production() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let request = Request::builder()
        .uri(format!("/v1/projects/{}/wallets", project_id))
        .header("x-api-key", "local-dev-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn api_key_requests_carry_rate_limit_headers() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/api-keys", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "name": "server" }).to_string()))
        .unwrap();
    let (_, body) = send(&router, request).await;
    let plaintext = body["data"]["key"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/v1/projects/{}/wallets", project_id))
        .header("x-api-key", &plaintext)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn auth_surface_is_ip_rate_limited() {
    let (_dir, router) = app();
    // ten attempts fit the 15-minute window; the eleventh is rejected
    for _ in 0..10 {
        let (status, _) = send(
            &router,
            post_json("/v1/auth/login", json!({ "email": "x@y.zz", "password": "wrong-P4ss!" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = send(
        &router,
        post_json("/v1/auth/login", json!({ "email": "x@y.zz", "password": "wrong-P4ss!" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], json!("RATE_LIMIT_EXCEEDED"));
}

#[tokio::test]
async fn paymaster_surface_over_http() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let (status, body) = send(
        &router,
        get_bearer(&format!("/v1/projects/{}/paymaster/addresses", project_id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["chain"], json!("ethereum"));

    let (status, body) = send(
        &router,
        get_bearer(&format!("/v1/projects/{}/paymaster/balance", project_id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["balanceWei"], json!("0"));

    // deposit funding instructions
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{}/paymaster/fund", project_id))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "chain": "ethereum", "method": "deposit" }).to_string()))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["method"], json!("deposit"));
    assert!(body["data"]["qrPayload"].as_str().unwrap().starts_with("ethereum:0x"));
}

#[tokio::test]
async fn analytics_overview_over_http() {
    let (_dir, router) = app();
    let token = register_and_login(&router, "alice@acme.com").await;
    let project_id = create_project(&router, &token).await;

    let (status, body) = send(
        &router,
        get_bearer(&format!("/v1/projects/{}/analytics/overview?days=7", project_id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_transactions"], json!(0));

    let (status, _) = send(
        &router,
        get_bearer(&format!("/v1/projects/{}/analytics/export", project_id), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
