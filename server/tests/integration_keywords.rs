use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use sticker_keywords::persist::keywords_path;
use sticker_keywords::KeywordStore;
use sticker_keywords_server::{router, AppState};
use tempfile::tempdir;
use tower::ServiceExt;

fn app_with_token(dir: &std::path::Path, token: Option<&str>) -> (Router, Arc<KeywordStore>) {
    let store = Arc::new(KeywordStore::open(dir));
    let state = AppState { store: Arc::clone(&store), admin_token: token.map(str::to_string) };
    (router(state), store)
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn set_get_query_and_hit() {
    let dir = tempdir().unwrap();
    let (app, _) = app_with_token(dir.path(), None);

    let (status, json) = call(&app, send_json("PUT", "/items/42/keywords", json!({ "keywords": ["cat", "Kitten"] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 42);
    assert_eq!(json["keywords"].as_array().unwrap().len(), 2);

    let (status, json) = call(&app, send_json("POST", "/items/42/hits", json!({ "keyword": "Kitten" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);

    let (_, json) = call(&app, get("/items/42/keywords")).await;
    assert_eq!(json["keywords"], json!(["Kitten", "cat"]));

    let (status, json) = call(&app, get("/query?q=kit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 1);
    let hit = &json["results"][0];
    assert_eq!(hit["id"], 42);
    assert_eq!(hit["keyword"], "Kitten");
    assert_eq!(hit["count"], 1);
    assert_eq!(hit["total"], 1);

    let (_, json) = call(&app, get("/query?q=kit&exact=true")).await;
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn mutations_are_written_through() {
    let dir = tempdir().unwrap();
    let (app, _) = app_with_token(dir.path(), None);
    call(&app, send_json("PUT", "/items/7/keywords", json!({ "keywords": ["dog"] }))).await;

    let text = fs::read_to_string(keywords_path(dir.path())).unwrap();
    assert!(text.starts_with("// SATANAS3\n"));
    assert!(text.contains("\"dog\":[\"7\"]"));
}

#[tokio::test]
async fn rejects_bad_requests() {
    let dir = tempdir().unwrap();
    let (app, _) = app_with_token(dir.path(), None);

    let (status, _) = call(&app, get("/items/not-a-number/keywords")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, send_json("POST", "/items/1/hits", json!({ "keyword": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let dir = tempdir().unwrap();
    let (open, _) = app_with_token(dir.path(), None);
    let (status, _) = call(&open, Request::post("/admin/save").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (app, _) = app_with_token(dir.path(), Some("secret"));
    let req = Request::post("/admin/save").header("X-ADMIN-TOKEN", "wrong").body(Body::empty()).unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/admin/save").header("X-ADMIN-TOKEN", "secret").body(Body::empty()).unwrap();
    let (status, json) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saved"], true);
}

#[tokio::test]
async fn admin_reload_picks_up_file_changes() {
    let dir = tempdir().unwrap();
    let (app, store) = app_with_token(dir.path(), Some("secret"));
    store.set_keywords(1, ["cat"]);

    fs::write(keywords_path(dir.path()), "// SATANAS2\n{\"dog\": [\"2\"], \"eel\": [\"3\"]}").unwrap();
    let req = Request::post("/admin/reload").header("X-ADMIN-TOKEN", "secret").body(Body::empty()).unwrap();
    let (status, json) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["loaded"], true);
    assert_eq!(json["keywords"], 2);

    let (_, json) = call(&app, get("/query?q=!")).await;
    assert_eq!(json["total_hits"], 2);
}

#[tokio::test]
async fn build_app_requires_existing_workdir() {
    let dir = tempdir().unwrap();
    assert!(sticker_keywords_server::build_app(dir.path().join("missing")).is_err());
    assert!(sticker_keywords_server::build_app(dir.path()).is_ok());
}
