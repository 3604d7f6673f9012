//! Gateway integration tests.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use kernelhub::hub::HubConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{spawn_backend, test_gateway, test_gateway_with, ALICE_TOKEN, BOB_TOKEN, REVOKED_TOKEN};

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method(Method::GET);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::DELETE)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn start_session(app: &Router, token: &str, name: &str) -> Value {
    let (status, body) = send(app, post_json("/sessions", Some(token), json!({"name": name}))).await;
    assert_eq!(status, StatusCode::OK);
    body
}

/// Health endpoint works without authentication.
#[tokio::test]
async fn test_health_endpoint() {
    let gw = test_gateway();

    let (status, body) = send(&gw.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

/// Every protected endpoint rejects missing, unknown, and revoked tokens,
/// and an unauthenticated start request never reaches the launcher.
#[tokio::test]
async fn test_auth_rejection() {
    let gw = test_gateway();

    let (status, body) = send(&gw.app, get("/sessions", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_AUTH");

    let (status, body) = send(&gw.app, get("/sessions", Some("no-such-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNKNOWN_TOKEN");

    let (status, body) = send(&gw.app, get("/sessions", Some(REVOKED_TOKEN))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "REVOKED_TOKEN");

    let (status, _) = send(
        &gw.app,
        post_json("/sessions", None, json!({"name": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(gw.launcher.spawns(), 0);
}

/// Starting a session installs a route and reports it running.
#[tokio::test]
async fn test_create_session_running() {
    let gw = test_gateway();

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    assert_eq!(session["state"], "running");
    assert_eq!(session["owner"], "alice");
    assert_eq!(session["route_prefix"], "/users/alice/s1");
    assert!(session["address"].is_string());
    assert!(session["started_at"].is_string());

    let (_, addr) = gw.routes.resolve("/users/alice/s1/api/run").unwrap();
    assert_eq!(Some(addr.as_str()), session["address"].as_str());
}

#[tokio::test]
async fn test_create_session_invalid_name() {
    let gw = test_gateway();

    let (status, body) = send(
        &gw.app,
        post_json("/sessions", Some(ALICE_TOKEN), json!({"name": "not a name"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(gw.launcher.spawns(), 0);
}

/// Sessions are visible only to their owner.
#[tokio::test]
async fn test_session_visibility_scoped_by_owner() {
    let gw = test_gateway();

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    let id = session["id"].as_str().unwrap();

    let (status, body) = send(&gw.app, get("/sessions", Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&gw.app, get("/sessions", Some(BOB_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&gw.app, get(&format!("/sessions/{id}"), Some(BOB_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&gw.app, get(&format!("/sessions/{id}"), Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
}

/// Full start/stop scenario: stop removes the route, keeps the terminal
/// session queryable, and frees the name for a fresh start.
#[tokio::test]
async fn test_start_then_stop() {
    let gw = test_gateway();

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    let id = session["id"].as_str().unwrap().to_string();

    let (status, body) = send(&gw.app, delete(&format!("/sessions/{id}"), ALICE_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
    assert!(body["stopped_at"].is_string());
    assert!(gw.routes.resolve("/users/alice/s1/x").is_none());
    assert_eq!(gw.launcher.terminations(), 1);

    // Still queryable inside the retention window.
    let (status, body) = send(&gw.app, get(&format!("/sessions/{id}"), Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");

    // Stopping again is idempotent: no second termination.
    let (status, body) = send(&gw.app, delete(&format!("/sessions/{id}"), ALICE_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");
    assert_eq!(gw.launcher.terminations(), 1);

    // The name is free again.
    let fresh = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    assert_eq!(fresh["state"], "running");
    assert_ne!(fresh["id"], id.as_str());
}

/// Starting a live session name again returns the existing session.
#[tokio::test]
async fn test_start_is_idempotent() {
    let gw = test_gateway();

    let first = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    let second = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(gw.launcher.spawns(), 1);
}

/// Spawn timeout scenario: the session is failed and no route is installed.
#[tokio::test]
async fn test_spawn_failure_reports_failed_session() {
    let gw = test_gateway();
    gw.launcher.fail_next_spawns();

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    assert_eq!(session["state"], "failed");
    assert!(session["error_message"].is_string());
    assert!(session["address"].is_null());
    assert!(gw.routes.is_empty());
}

/// Proxied requests reach the kernel backend, with longest-prefix isolation
/// between sessions whose names share a prefix.
#[tokio::test]
async fn test_proxy_forwards_and_isolates_prefixes() {
    let gw = test_gateway();

    start_session(&gw.app, ALICE_TOKEN, "s1").await;
    start_session(&gw.app, ALICE_TOKEN, "s10").await;

    // Point the installed routes at real backends.
    let backend_one = spawn_backend("backend-one").await;
    let backend_ten = spawn_backend("backend-ten").await;
    gw.routes.put("/users/alice/s1", backend_one.to_string());
    gw.routes.put("/users/alice/s10", backend_ten.to_string());

    let (status, _) = send(&gw.app, get("/users/alice/s1/exec", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = gw
        .app
        .clone()
        .oneshot(get("/users/alice/s1/exec", Some(ALICE_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"backend-one");

    let response = gw
        .app
        .clone()
        .oneshot(get("/users/alice/s10/exec", Some(ALICE_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"backend-ten");
}

/// Traffic for a path with no installed route is a routing error.
#[tokio::test]
async fn test_proxy_no_route() {
    let gw = test_gateway();

    let (status, body) = send(&gw.app, get("/users/alice/nothing/x", Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

/// A stale route (kernel crashed, nothing listening) surfaces as
/// upstream-unavailable and reports the prefix for invalidation.
#[tokio::test]
async fn test_proxy_stale_route_reports_unavailable() {
    let mut gw = test_gateway();

    start_session(&gw.app, ALICE_TOKEN, "s1").await;

    // The mock's address has no listener behind it.
    let (status, body) = send(&gw.app, get("/users/alice/s1/exec", Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

    let prefix = gw.invalidations.recv().await.unwrap();
    assert_eq!(prefix, "/users/alice/s1");

    // The hub probes the kernel on invalidation; a live kernel keeps its
    // route, so the self-healing only kicks in once the process is gone.
    gw.launcher.kill_all();
    gw.hub.handle_invalidation(&prefix).await;
    assert!(gw.routes.resolve("/users/alice/s1/exec").is_none());
}

/// Externally killed kernel: the reaper fails the session and removes the
/// route within one pass.
#[tokio::test]
async fn test_reaper_detects_dead_kernel() {
    let gw = test_gateway();

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    let id = session["id"].as_str().unwrap();

    gw.launcher.kill_all();
    gw.hub.reap().await;

    let (status, body) = send(&gw.app, get(&format!("/sessions/{id}"), Some(ALICE_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
    assert!(gw.routes.is_empty());
}

/// Idle sessions are stopped by the reaper once the idle timeout elapses.
#[tokio::test]
async fn test_reaper_stops_idle_session() {
    let gw = test_gateway_with(HubConfig {
        session_idle_timeout: Duration::ZERO,
        ..HubConfig::default()
    });

    let session = start_session(&gw.app, ALICE_TOKEN, "s1").await;
    let id = session["id"].as_str().unwrap();

    gw.hub.reap().await;

    let (_, body) = send(&gw.app, get(&format!("/sessions/{id}"), Some(ALICE_TOKEN))).await;
    assert_eq!(body["state"], "stopped");
    assert!(gw.routes.is_empty());
}
