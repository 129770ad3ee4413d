//! End-to-end integration tests for the storage gateway.
//!
//! These tests drive the full router in-process and verify complete flows:
//! - Login, credential transport and refresh
//! - Tenant-confined directory operations
//! - Resumable uploads and chunked downloads
//! - Error status codes and bodies

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use protocol::messages::{FileEntry, TokenResponse};
use protocol::ServiceKey;
use serde_json::{json, Value};
use server::auth::MemoryUserDirectory;
use server::config::MAX_CHUNK_SIZE;
use server::{build_state, gateway, Config};
use tempfile::TempDir;
use tower::ServiceExt;

/// Create a router backed by a temporary storage root and two tenants.
fn create_test_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.server.data_dir = temp_dir.path().to_path_buf();
    config.storage.root_dir = Some(temp_dir.path().join("storage"));
    config.storage.chunk_size = 4;

    let users = MemoryUserDirectory::new()
        .with_user("alice", "alice", "wonderland")
        .with_user("bob", "bob", "builder");

    let state = build_state(&config, Arc::new(users), ServiceKey::generate());
    (gateway::router(state), temp_dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body.to_vec())
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn call(app: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let (status, _, body) = send(app, json_request(Method::POST, uri, Some(token), body)).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn login(app: &Router, name: &str, password: &str) -> TokenResponse {
    let request = json_request(
        Method::POST,
        "/authentication/login",
        None,
        json!({"name": name, "password": password}),
    );
    let (status, _, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

async fn upload_chunk(app: &Router, token: &str, id: usize, data: &'static [u8]) -> StatusCode {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/filesystem/upload/chunk?id={id}"))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(data))
        .unwrap();
    send(app, request).await.0
}

async fn download_chunk(app: &Router, token: &str, id: usize) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .uri(format!("/filesystem/download/chunk?id={id}"))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, body)
}

// =============================================================================
// Authentication Tests
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (app, _temp_dir) = create_test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_login_issues_token_and_cookie() {
    let (app, _temp_dir) = create_test_app();
    let request = json_request(
        Method::POST,
        "/authentication/login",
        None,
        json!({"name": "alice", "password": "wonderland"}),
    );
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let token: TokenResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(token.root_dir, "alice/");
    assert!(!token.token.is_empty());

    let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with(&format!("token={}", token.token)));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let (app, _temp_dir) = create_test_app();

    for (name, password) in [("alice", "wrong"), ("mallory", "wonderland")] {
        let request = json_request(
            Method::POST,
            "/authentication/login",
            None,
            json!({"name": name, "password": password}),
        );
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"error": "wrong credentials", "kind": "wrong_credentials"}));
    }
}

#[tokio::test]
async fn test_filesystem_requires_credential() {
    let (app, _temp_dir) = create_test_app();

    let request = json_request(Method::POST, "/filesystem/ls", None, json!({"dir_path": "/"}));
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "/filesystem/ls", "not.a-token", json!({"dir_path": "/"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cookie_credential_is_accepted() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filesystem/ls")
        .header(CONTENT_TYPE, "application/json")
        .header(COOKIE, format!("token={}", token.token))
        .body(Body::from(json!({"dir_path": "/"}).to_string()))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["empty"], true);
}

#[tokio::test]
async fn test_refresh_and_validate() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await;

    let request = json_request(
        Method::POST,
        "/authentication/refresh",
        None,
        json!({"token": token.token}),
    );
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let refreshed: TokenResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(refreshed.root_dir, "alice/");
    assert!(refreshed.expires_at >= token.expires_at);

    // refresh with an empty body falls back to the header
    let request = Request::builder()
        .method(Method::POST)
        .uri("/authentication/refresh")
        .header(AUTHORIZATION, format!("Bearer {}", refreshed.token))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::OK);

    let request = json_request(
        Method::POST,
        "/authentication/validate",
        None,
        json!({"token": refreshed.token}),
    );
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"name": "alice", "root_dir": "alice/"}));
}

#[tokio::test]
async fn test_refresh_rejects_tampered_token() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await;
    let (payload, _) = token.token.split_once('.').unwrap();

    let request = json_request(
        Method::POST,
        "/authentication/refresh",
        None,
        json!({"token": format!("{payload}.AAAA")}),
    );
    assert_eq!(send(&app, request).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await;

    let request = json_request(Method::POST, "/authentication/logout", Some(&token.token), json!({}));
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.contains("Max-Age=0"));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["message"], "logged out successfully");
}

// =============================================================================
// Filesystem Tests
// =============================================================================

#[tokio::test]
async fn test_directory_operations() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    let (status, body) = call(
        &app,
        "/filesystem/mkdir",
        &token,
        json!({"path": "/", "dir_name": "docs"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/docs/");

    let (status, body) = call(
        &app,
        "/filesystem/mkdir",
        &token,
        json!({"path": "/", "dir_name": "docs"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "/filesystem/cd", &token, json!({"path": "docs"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/docs/");

    // relative to the new current directory
    let (_, body) = call(
        &app,
        "/filesystem/mkdir",
        &token,
        json!({"path": "", "dir_name": "inner"}),
    )
    .await;
    assert_eq!(body["path"], "/docs/inner/");

    let (status, body) = call(&app, "/filesystem/cd", &token, json!({"path": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "directory ghost not found", "kind": "not_found"}));

    let (_, body) = call(&app, "/filesystem/cd", &token, json!({"path": ".."})).await;
    assert_eq!(body["path"], "/");

    let (status, _) = call(
        &app,
        "/filesystem/rename",
        &token,
        json!({"dir_path": "/", "old_name": "docs", "new_name": "papers"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "/filesystem/ls", &token, json!({"dir_path": "/"})).await;
    let entries: Vec<FileEntry> = serde_json::from_value(body["entries"].clone()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "papers");
    assert!(entries[0].is_dir);

    let (status, _) = call(
        &app,
        "/filesystem/delete",
        &token,
        json!({"dir_path": "/", "file_name": "papers"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "/filesystem/ls", &token, json!({"dir_path": "/"})).await;
    assert_eq!(body["empty"], true);
}

#[tokio::test]
async fn test_two_logins_of_one_user_keep_separate_state() {
    let (app, _temp_dir) = create_test_app();
    let laptop = login(&app, "alice", "wonderland").await.token;
    let phone = login(&app, "alice", "wonderland").await.token;

    call(&app, "/filesystem/mkdir", &laptop, json!({"path": "/", "dir_name": "docs"})).await;
    let (_, body) = call(&app, "/filesystem/cd", &laptop, json!({"path": "docs"})).await;
    assert_eq!(body["path"], "/docs/");

    let (_, body) = call(&app, "/filesystem/mkdir", &phone, json!({"path": "", "dir_name": "top"})).await;
    assert_eq!(body["path"], "/top/");

    let start = json!({"location": "/", "file_name": "a.txt", "chunks_num": 2});
    call(&app, "/filesystem/upload", &laptop, start).await;
    assert_eq!(upload_chunk(&app, &laptop, 0, b"aaaa").await, StatusCode::OK);

    let start = json!({"location": "/", "file_name": "b.txt", "chunks_num": 1});
    call(&app, "/filesystem/upload", &phone, start).await;

    let (_, body) = call(&app, "/filesystem/upload/complete", &laptop, json!({})).await;
    assert_eq!(body["missed_chunks"], json!([1]));
}

#[tokio::test]
async fn test_paths_cannot_escape_tenant_root() {
    let (app, _temp_dir) = create_test_app();
    let alice = login(&app, "alice", "wonderland").await.token;
    let bob = login(&app, "bob", "builder").await.token;

    call(
        &app,
        "/filesystem/mkdir",
        &bob,
        json!({"path": "/", "dir_name": "private"}),
    )
    .await;

    let (status, _) = call(&app, "/filesystem/ls", &alice, json!({"dir_path": "/../bob/"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = call(&app, "/filesystem/ls", &alice, json!({"dir_path": "/"})).await;
    assert_eq!(body["empty"], true);
}

#[tokio::test]
async fn test_state_returns_tenant_tree() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;
    call(
        &app,
        "/filesystem/mkdir",
        &token,
        json!({"path": "/", "dir_name": "docs"}),
    )
    .await;

    let request = Request::builder()
        .uri("/filesystem/state")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    let tree: FileEntry = serde_json::from_value(body["info"].clone()).unwrap();
    assert!(tree.is_dir);
    assert!(tree.child("docs").is_some());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    let (status, body) = call(&app, "/filesystem/mkdir", &token, json!({"path": "/"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

// =============================================================================
// Transfer Tests
// =============================================================================

#[tokio::test]
async fn test_resumable_upload_and_download() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    call(
        &app,
        "/filesystem/mkdir",
        &token,
        json!({"path": "/", "dir_name": "docs"}),
    )
    .await;

    let (status, _) = call(
        &app,
        "/filesystem/upload",
        &token,
        json!({"location": "/docs/", "file_name": "a.txt", "chunks_num": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(upload_chunk(&app, &token, 2, b"cc").await, StatusCode::OK);
    assert_eq!(upload_chunk(&app, &token, 0, b"aaaa").await, StatusCode::OK);

    let (status, body) = call(&app, "/filesystem/upload/complete", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missed_chunks"], json!([1]));

    assert_eq!(upload_chunk(&app, &token, 1, b"bbbb").await, StatusCode::OK);
    let (status, body) = call(&app, "/filesystem/upload/complete", &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missed_chunks"], json!([]));
    assert_eq!(body["message"], "upload completed successfully");

    let (_, body) = call(&app, "/filesystem/ls", &token, json!({"dir_path": "/docs/"})).await;
    let entries: Vec<FileEntry> = serde_json::from_value(body["entries"].clone()).unwrap();
    assert_eq!(entries.len(), 1, "temporary chunk directory must be gone");
    assert_eq!(entries[0].name, "a.txt");
    assert_eq!(entries[0].size, 10);

    let (status, body) = call(
        &app,
        "/filesystem/download",
        &token,
        json!({"location": "/docs/", "file_name": "a.txt"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let chunks = body["chunks_num"].as_u64().unwrap() as usize;
    assert_eq!(chunks, 3);

    let mut data = Vec::new();
    for id in (0..chunks).rev() {
        let (status, chunk) = download_chunk(&app, &token, id).await;
        assert_eq!(status, StatusCode::OK);
        data.splice(0..0, chunk);
    }
    assert_eq!(data, b"aaaabbbbcc");

    let (status, _) = download_chunk(&app, &token, chunks).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chunk_without_upload_is_bad_request() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    assert_eq!(upload_chunk(&app, &token, 0, b"x").await, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filesystem/upload/chunk?id=abc")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from("x"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_oversized_chunk_gets_json_error() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    let (status, _) = call(
        &app,
        "/filesystem/upload",
        &token,
        json!({"location": "/", "file_name": "big.bin", "chunks_num": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/filesystem/upload/chunk?id=0")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(vec![0u8; MAX_CHUNK_SIZE + 128 * 1024]))
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("length limit"));

    let (_, body) = call(&app, "/filesystem/upload/complete", &token, json!({})).await;
    assert_eq!(body["missed_chunks"], json!([0]));
}

#[tokio::test]
async fn test_download_missing_file() {
    let (app, _temp_dir) = create_test_app();
    let token = login(&app, "alice", "wonderland").await.token;

    let (status, body) = call(
        &app,
        "/filesystem/download",
        &token,
        json!({"location": "/", "file_name": "nope.txt"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}
