// Tests for the HTTP control API
//
// Requests go straight into the router with tower's `oneshot`; the call behind it runs on
// fake devices and an in-memory engine.

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Harness;
use loqa_voice::{create_router, AppState, Role, TransportEvent};
use serde_json::Value;
use tower::ServiceExt;

async fn send(router: &Router, method: &str, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())?;
    let response = router.clone().oneshot(request).await?;

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    Ok((status, body))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    let (status, body) = send(&router, "GET", "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_status_when_idle() -> Result<()> {
    let h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    let (status, body) = send(&router, "GET", "/call/status").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "idle");
    assert_eq!(body["is_muted"], false);
    assert_eq!(body["is_remote_speaking"], false);

    Ok(())
}

#[tokio::test]
async fn test_start_then_conflict() -> Result<()> {
    let h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    let (status, body) = send(&router, "POST", "/call/start").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "connecting");

    let (status, body) = send(&router, "POST", "/call/start").await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already in progress"));

    Ok(())
}

#[tokio::test]
async fn test_full_call_over_http() -> Result<()> {
    let mut h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    send(&router, "POST", "/call/start").await?;
    let engine = h.engine().await?;
    engine.events.send(TransportEvent::Open)?;
    h.wait(|s| s.status.is_active()).await?;

    let (status, body) = send(&router, "POST", "/call/mute").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_muted"], true);

    let (_, body) = send(&router, "GET", "/call/status").await?;
    assert_eq!(body["status"]["state"], "active");
    assert_eq!(body["is_muted"], true);

    engine.events.send(TransportEvent::TranscriptionDelta {
        role: Role::Model,
        text: "Hello!".to_string(),
    })?;
    engine.events.send(TransportEvent::TurnComplete)?;
    h.wait(|s| s.transcript.len() == 1).await?;

    let (status, body) = send(&router, "GET", "/call/transcript").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["role"], "model");
    assert_eq!(body[0]["text"], "Hello!");

    let (status, body) = send(&router, "POST", "/call/hangup").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "ended");

    // Hanging up again is harmless
    let (status, _) = send(&router, "POST", "/call/hangup").await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_mute_when_idle_reports_unmuted() -> Result<()> {
    let h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    let (status, body) = send(&router, "POST", "/call/mute").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_muted"], false);

    Ok(())
}

#[tokio::test]
async fn test_unknown_route() -> Result<()> {
    let h = Harness::new();
    let router = create_router(AppState::new(h.call.clone()));

    let (status, _) = send(&router, "GET", "/call/record").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
