use std::time::Duration;

use natun_core::{ConnectResponse, LocalDevice, PeerStatus, ResetPasswordResponse};
use natun_mock_agent::{AgentSettings, AppState, build_router};
use tokio::{net::TcpListener, sync::oneshot};

#[tokio::test]
async fn connect_flows_from_connecting_to_alive() {
    let (base, state, shutdown_tx) = start_agent(AgentSettings {
        connect_delay: Duration::from_millis(50),
        ..AgentSettings::default()
    })
    .await;
    let client = reqwest::Client::new();

    let response: ConnectResponse = client
        .post(format!("{base}/api/connect"))
        .json(&serde_json::json!({"targetId": "AB12CD34", "targetPwd": "123456"}))
        .send()
        .await
        .expect("send connect")
        .json()
        .await
        .expect("decode connect");
    assert_eq!(response.code, 0);

    let status = fetch_status(&client, &base).await;
    assert!(status.status.is_connecting);
    assert!(!status.device.alive);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = fetch_status(&client, &base).await;
    assert!(status.device.alive);
    assert_eq!(status.device.client_id, "AB12CD34");
    assert_eq!(status.status.status_text, "P2P direct");
    assert_eq!(state.connect_requests().await.len(), 1);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn malformed_connect_requests_are_rejected_with_code() {
    let (base, state, shutdown_tx) = start_agent(AgentSettings::default()).await;
    let client = reqwest::Client::new();

    for (body, expected) in [
        (serde_json::json!({"targetId": "", "targetPwd": "123456"}), "target id must not be empty"),
        (serde_json::json!({"targetId": "SHORT", "targetPwd": "123456"}), "invalid target id"),
        (serde_json::json!({"targetId": "AB12CD34", "targetPwd": ""}), "password must not be empty"),
        (serde_json::json!({"target": 1}), "invalid request"),
    ] {
        let response = client
            .post(format!("{base}/api/connect"))
            .json(&body)
            .send()
            .await
            .expect("send connect");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let decoded: ConnectResponse = response.json().await.expect("decode rejection");
        assert_eq!(decoded.code, -1);
        assert_eq!(decoded.message.as_deref(), Some(expected));
    }
    assert!(state.connect_requests().await.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn reset_password_updates_device() {
    let (base, _state, shutdown_tx) = start_agent(AgentSettings::default()).await;
    let client = reqwest::Client::new();

    let rejected: ResetPasswordResponse = client
        .post(format!("{base}/api/resetPassword"))
        .json(&serde_json::json!({"newPassword": "12a456"}))
        .send()
        .await
        .expect("send reset")
        .json()
        .await
        .expect("decode reset");
    assert_eq!(rejected.code, -1);
    assert_eq!(rejected.message.as_deref(), Some("password may contain digits only"));

    let accepted: ResetPasswordResponse = client
        .post(format!("{base}/api/resetPassword"))
        .json(&serde_json::json!({"newPassword": "246810"}))
        .send()
        .await
        .expect("send reset")
        .json()
        .await
        .expect("decode reset");
    assert_eq!(accepted.code, 0);
    assert_eq!(accepted.password.as_deref(), Some("246810"));

    let device: LocalDevice = client
        .get(format!("{base}/api/device"))
        .send()
        .await
        .expect("fetch device")
        .json()
        .await
        .expect("decode device");
    assert_eq!(device.password, "246810");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unavailable_endpoints_answer_404_without_cache() {
    let (base, state, shutdown_tx) = start_agent(AgentSettings::default()).await;
    let client = reqwest::Client::new();
    state.set_status_available(false).await;

    let response = client
        .get(format!("{base}/api/peerStatus"))
        .send()
        .await
        .expect("fetch status");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache, no-store, must-revalidate")
    );

    let _ = shutdown_tx.send(());
}

async fn fetch_status(client: &reqwest::Client, base: &str) -> PeerStatus {
    client
        .get(format!("{base}/api/peerStatus"))
        .send()
        .await
        .expect("fetch status")
        .json()
        .await
        .expect("decode status")
}

async fn start_agent(settings: AgentSettings) -> (String, AppState, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral agent socket");
    let address = listener.local_addr().expect("agent local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let state = AppState::new(settings);
    let server = axum::serve(listener, build_router(state.clone())).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", address), state, shutdown_tx)
}
