//! HTTP endpoints through the real router

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use kurve_server::app::AppState;
use kurve_server::config::Config;
use kurve_server::http::build_router;

fn state(vars: &[(&str, &str)]) -> AppState {
    let config = Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap();
    AppState::new(config)
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_an_idle_server() {
    let (status, body) = get_json(state(&[]), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeGames"], 0);
    assert_eq!(body["connectedPlayers"], 0);
    assert!(body["uptimeSecs"].is_u64());
}

#[tokio::test]
async fn config_tells_the_page_where_to_connect() {
    let vars = [
        ("CONNECT_ADDRESS", "kurve.example"),
        ("CONNECT_PORT", "9000"),
        ("GAME_MODE", "pong"),
    ];
    let (status, body) = get_json(state(&vars), "/config").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"connectAddress": "kurve.example", "connectPort": 9000, "mode": "pong"})
    );
}

#[tokio::test]
async fn cors_echoes_any_origin_by_default() {
    let response = build_router(state(&[]))
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}

#[tokio::test]
async fn plain_get_on_ws_is_not_an_upgrade() {
    let response = build_router(state(&[]))
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
