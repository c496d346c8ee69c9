// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::disallowed_macros,
    clippy::uninlined_format_args
)]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use fileserver_server::{server::create_app, AppState, Config};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

const HELLO_ETAG: &str = "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\"";

#[derive(Clone, Default)]
struct FakeCc {
    /// `(app_guid, authorization)` for each download request.
    downloads: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

async fn buildpack_cache(
    State(cc): State<FakeCc>,
    Path(app_guid): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorization =
        headers.get("authorization").and_then(|v| v.to_str().ok()).map(ToString::to_string);
    cc.downloads.lock().unwrap().push((app_guid.clone(), authorization));
    if app_guid == "forbidden-app" {
        return (StatusCode::FORBIDDEN, "denied").into_response();
    }
    "cached bits".into_response()
}

async fn bind() -> Option<TcpListener> {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => Some(listener),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => None,
        Err(e) => panic!("Failed to bind test listener: {e}"),
    }
}

struct Harness {
    addr: SocketAddr,
    cc: FakeCc,
    static_dir: TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start() -> Option<Harness> {
    let cc = FakeCc::default();
    let cc_listener = bind().await?;
    let cc_addr = cc_listener.local_addr().unwrap();
    let cc_app = Router::new()
        .route("/staging/buildpack_cache/{app_guid}/download", get(buildpack_cache))
        .with_state(cc.clone());
    tokio::spawn(async move {
        axum::serve(cc_listener, cc_app).await.unwrap();
    });

    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("hello.txt"), b"hello").unwrap();
    std::fs::create_dir(static_dir.path().join("nested")).unwrap();

    let mut config = Config::default();
    config.server.static_directory = static_dir.path().to_string_lossy().into_owned();
    config.upstream.address = format!("http://{cc_addr}");
    config.upstream.username = "bob".to_string();
    config.upstream.password = "password".to_string();

    let state = AppState::from_config(config).expect("valid test config");
    let listener = bind().await?;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(Arc::new(state))).await.unwrap();
    });

    Some(Harness { addr, cc, static_dir })
}

#[tokio::test]
async fn health_reports_ok_with_security_headers() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };

    let response = reqwest::get(harness.url("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn static_file_carries_content_hash_etag() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };
    let client = reqwest::Client::new();

    let response = client.get(harness.url("/v1/static/hello.txt")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["etag"], HELLO_ETAG);
    assert_eq!(response.text().await.unwrap(), "hello");

    let response = client
        .get(harness.url("/v1/static/hello.txt"))
        .header("If-None-Match", HELLO_ETAG)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()["etag"], HELLO_ETAG);

    let response = client
        .get(harness.url("/v1/static/hello.txt"))
        .header("If-None-Match", "\"stale\"")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rewritten_file_gets_a_new_etag() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };
    let client = reqwest::Client::new();

    let first = client.get(harness.url("/v1/static/hello.txt")).send().await.unwrap();
    assert_eq!(first.headers()["etag"], HELLO_ETAG);

    std::fs::write(harness.static_dir.path().join("hello.txt"), b"hello, world").unwrap();
    let second = client.get(harness.url("/v1/static/hello.txt")).send().await.unwrap();
    assert_ne!(second.headers()["etag"], HELLO_ETAG);
    assert_eq!(second.text().await.unwrap(), "hello, world");
}

#[tokio::test]
async fn static_errors() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };
    let client = reqwest::Client::new();

    let response = client.get(harness.url("/v1/static/missing.txt")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "File not found: missing.txt");

    let response = client.get(harness.url("/v1/static/nested")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client.get(harness.url("/v1/static/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text().await.unwrap(), "Unauthorized to list the directory");

    // %5C keeps the URL parser from normalizing the traversal away.
    let response =
        client.get(harness.url("/v1/static/nested%5C..%5Chello.txt")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "invalid URL path");
}

#[tokio::test]
async fn build_artifacts_download_streams_from_controller() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };

    let response = reqwest::get(harness.url("/v1/build_artifacts/app-guid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.content_length(), Some(11));
    assert_eq!(response.text().await.unwrap(), "cached bits");

    let downloads = harness.cc.downloads.lock().unwrap().clone();
    assert_eq!(
        downloads,
        vec![("app-guid".to_string(), Some("Basic Ym9iOnBhc3N3b3Jk".to_string()))]
    );
}

#[tokio::test]
async fn build_artifacts_download_relays_failure_status() {
    let Some(harness) = start().await else {
        eprintln!("Skipping HTTP test: local TCP bind not permitted");
        return;
    };

    let response = reqwest::get(harness.url("/v1/build_artifacts/forbidden-app")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text().await.unwrap(), "Got status: 403\ndenied");
}
