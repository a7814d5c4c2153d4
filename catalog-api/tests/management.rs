//! End-to-end coverage of the management router against the reference
//! plugin: apply+persist+reload, the SecretRef resolve/redact asymmetry,
//! validation failure, rate limiting, and rollback.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use catalog_api::{HeaderRoleExtractor, Server, ServerConfig};
use catalog_core::store::file::FileConfigStore;
use catalog_core::store::ConfigStore;
use catalog_plugins::Plugin;
use catalog_security::StaticSecretBackend;
use catalog_tenant::{OverlayStore, RefreshStatusStore};
use reference_plugin::ReferencePlugin;

const BASE: &str = "/api/reference_catalog/v1/management";

async fn test_server(tmp: &tempfile::TempDir) -> Arc<Server> {
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(tmp.path().join("sources.yaml")));
    let db = Arc::new(sled::open(tmp.path().join("db")).unwrap());
    let overlay = Arc::new(OverlayStore::open(&db, "overlay").unwrap());
    let refresh_status = Arc::new(RefreshStatusStore::open(&db, "refresh_status").unwrap());
    let secret_backend =
        Arc::new(StaticSecretBackend::new().with_secret("default", "creds", "api-key", "sk-test-123"));
    let plugin: Arc<dyn Plugin> = Arc::new(ReferencePlugin::new());

    Server::new(
        ServerConfig::default(),
        vec![plugin],
        Some(store),
        Some(secret_backend),
        Some(db),
        overlay,
        refresh_status,
        Arc::new(HeaderRoleExtractor),
    )
    .await
    .unwrap()
}

fn req(method: &str, uri: &str, role: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-role", role)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, role: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-user-role", role)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn apply_source_persists_and_is_visible_on_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let source = json!({
        "id": "src-1",
        "name": "First source",
        "type": "demo",
        "properties": {"url": "https://example.com"},
    });
    let response = router
        .clone()
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "operator", source))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "applied");

    let response = router
        .clone()
        .oneshot(get(&format!("{BASE}/sources"), "viewer"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sources = body_json(response).await;
    assert_eq!(sources.as_array().unwrap().len(), 1);
    assert_eq!(sources[0]["id"], "src-1");

    // Reload a fresh server from the same store and confirm it's still there.
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(tmp.path().join("sources.yaml")));
    let (reloaded, _version) = store.load().await.unwrap();
    assert!(reloaded.section("reference").unwrap().find("src-1").is_some());
}

#[tokio::test]
async fn secret_ref_is_resolved_for_the_plugin_but_not_for_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let source = json!({
        "id": "src-1",
        "name": "First source",
        "type": "demo",
        "properties": {
            "apiKey": {"name": "creds", "key": "api-key"},
        },
    });
    let response = router
        .clone()
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "operator", source))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // list-sources still returns the unresolved SecretRef shape, never the
    // resolved secret value.
    let response = router
        .clone()
        .oneshot(get(&format!("{BASE}/sources"), "viewer"))
        .await
        .unwrap();
    let sources = body_json(response).await;
    assert_eq!(sources[0]["properties"]["apiKey"]["key"], "api-key");
    assert!(sources[0]["properties"]["apiKey"]["name"].is_string());

    // the store itself only ever sees the unresolved reference too.
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(tmp.path().join("sources.yaml")));
    let (config, _version) = store.load().await.unwrap();
    let persisted = config.section("reference").unwrap().find("src-1").unwrap();
    assert!(persisted.properties["apiKey"].as_secret_ref().is_some());
}

#[tokio::test]
async fn apply_source_with_invalid_id_is_rejected_with_422() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let source = json!({
        "id": "Not-Valid",
        "name": "Bad id",
        "type": "demo",
        "properties": {},
    });
    let response = router
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "operator", source))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn viewer_role_cannot_apply_source() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let source = json!({"id": "src-1", "name": "x", "type": "demo", "properties": {}});
    let response = router
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "viewer", source))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refresh_all_is_rate_limited_on_back_to_back_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let source = json!({"id": "src-1", "name": "x", "type": "demo", "properties": {}});
    router
        .clone()
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "operator", source))
        .await
        .unwrap();

    let first = router
        .clone()
        .oneshot(req("POST", &format!("{BASE}/refresh"), "operator", json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .oneshot(req("POST", &format!("{BASE}/refresh"), "operator", json!({})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn rollback_restores_the_previous_revision_and_reinitializes_the_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(tmp.path().join("sources.yaml")));
    let (_empty_config, v0) = store.load().await.unwrap();

    let source = json!({"id": "src-1", "name": "First", "type": "demo", "properties": {}});
    router
        .clone()
        .oneshot(req("POST", &format!("{BASE}/apply-source"), "operator", source))
        .await
        .unwrap();

    let rollback_body = json!({"version": v0.0});
    let response = router
        .clone()
        .oneshot(req(
            "POST",
            &format!("{BASE}/sources/src-1:rollback"),
            "operator",
            rollback_body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "rolled_back");

    let response = router
        .oneshot(get(&format!("{BASE}/sources"), "viewer"))
        .await
        .unwrap();
    let sources = body_json(response).await;
    assert_eq!(sources.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn diagnostics_and_list_plugins_surface_the_reference_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    let server = test_server(&tmp).await;
    let router = server.router().await;

    let response = router
        .clone()
        .oneshot(get(&format!("{BASE}/diagnostics"), "viewer"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let diagnostics = body_json(response).await;
    assert_eq!(diagnostics["sourceCount"], 0);

    let response = router.oneshot(get("/api/plugins", "viewer")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["plugins"][0]["name"], "reference");
    assert_eq!(body["plugins"][0]["status"], "healthy");
}
