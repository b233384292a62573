#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! HTTP API integration tests
//!
//! Builds the same routes as main.rs and drives them with `oneshot`, so the
//! JSON views are checked after commands go through the router.

mod mock_channel;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use mock_channel::MockChannelFactory;
use smart_home_hub::adapters::mqtt::MqttAdapter;
use smart_home_hub::api::{self, AppState};
use smart_home_hub::bus::create_bus;
use smart_home_hub::registry::Registry;
use smart_home_hub::router::CommandRouter;
use smart_home_hub::store::StateStore;

fn create_app(dir: &std::path::Path) -> (Router, AppState) {
    let bus = create_bus();
    let router = CommandRouter::new(
        Arc::new(Registry::with_default_layout()),
        Arc::new(StateStore::new(dir)),
        MockChannelFactory::new(),
        bus.clone(),
    );
    let state = AppState::new(Arc::new(router), Arc::new(MqttAdapter::new(bus.clone())), bus);

    let app = Router::new()
        .route("/status", get(api::status_handler))
        .route("/devices", get(api::devices_handler))
        .route("/devices/{room}/{name}", get(api::device_handler))
        .with_state(state.clone());
    (app, state)
}

/// GET `path` and parse the body as JSON
async fn get_json(app: &Router, path: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn status_reports_layout_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_app(dir.path());

    let (status, body) = get_json(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "smart-home-hub");
    assert_eq!(body["rooms"], 3);
    assert_eq!(body["devices"], 10);
    assert_eq!(body["mqtt_configured"], false);
    assert!(body["version"].as_str().is_some_and(|v| !v.is_empty()));
    assert!(body["git_sha"].as_str().is_some_and(|sha| !sha.is_empty()));
}

#[tokio::test]
async fn device_views_follow_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = create_app(dir.path());

    state
        .router
        .set_device_value("bedroom", "ac1", "temperature", "19")
        .await
        .unwrap();
    state
        .router
        .add_tv_device("living room", "tv", "192.168.1.20", 5555)
        .await
        .unwrap();

    let (status, body) = get_json(&app, "/devices/master%20bedroom/ac1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["temperature"], 19);

    let (_, all) = get_json(&app, "/devices").await;
    assert_eq!(all["livingroom"]["tv"]["type"], "tv");
    assert_eq!(all["livingroom"]["tv"]["state"]["volume"], 50);

    let (_, status_body) = get_json(&app, "/status").await;
    assert_eq!(status_body["devices"], 11);
}

#[tokio::test]
async fn unknown_device_is_json_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = create_app(dir.path());

    let (status, body) = get_json(&app, "/devices/lounge/toaster").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Device toaster not found in livingroom.");
}
