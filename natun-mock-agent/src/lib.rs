use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use natun_core::{
    CONNECT_CODE_LEN, ConnectRequest, ConnectResponse, ConnectionInfo, ConnectionMode, Latency,
    LocalDevice, MSG_CONNECT_FAILED, MSG_CONNECTING, PeerDevice, PeerStatus, ResetPasswordRequest,
    ResetPasswordResponse, ValidationError, api::STATUS_NOT_CONNECTED, validate_password,
};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};

const SIMULATED_LATENCY_MS: i64 = 18;

/// How the simulated agent identifies itself and resolves connect requests.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub client_id: String,
    pub password: String,
    pub ip: String,
    pub nat_type: String,
    /// Password every peer expects. `None` accepts any password.
    pub peer_password: Option<String>,
    pub peer_ip: String,
    /// Link the simulated connection settles on.
    pub link: ConnectionMode,
    pub connect_delay: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            client_id: "NT4K2QX9".to_owned(),
            password: "123456".to_owned(),
            ip: "10.8.0.1".to_owned(),
            nat_type: "NAT3".to_owned(),
            peer_password: None,
            peer_ip: "10.8.0.2".to_owned(),
            link: ConnectionMode::Direct,
            connect_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug)]
struct AgentState {
    settings: AgentSettings,
    device: LocalDevice,
    peer: PeerDevice,
    mode: ConnectionMode,
    connecting: bool,
    connect_failed: bool,
    connect_message: String,
    attempt: u64,
    connect_requests: Vec<ConnectRequest>,
    device_available: bool,
    status_available: bool,
}

impl AgentState {
    fn new(settings: AgentSettings) -> Self {
        let device = LocalDevice {
            client_id: settings.client_id.clone(),
            ip: settings.ip.clone(),
            nat_type: settings.nat_type.clone(),
            password: settings.password.clone(),
        };
        Self {
            settings,
            device,
            peer: PeerDevice {
                client_id: String::new(),
                ip: String::new(),
                alive: false,
                latency: Latency::Millis(0),
            },
            mode: ConnectionMode::Disconnected,
            connecting: false,
            connect_failed: false,
            connect_message: String::new(),
            attempt: 0,
            connect_requests: Vec::new(),
            device_available: true,
            status_available: true,
        }
    }

    fn peer_status(&self) -> PeerStatus {
        let (mode, status_text) = match self.mode {
            ConnectionMode::Direct => ("direct", "P2P direct"),
            ConnectionMode::Relay => ("relay", "server relay"),
            ConnectionMode::Disconnected => (
                "disconnected",
                if self.connecting {
                    MSG_CONNECTING
                } else if self.connect_failed {
                    MSG_CONNECT_FAILED
                } else {
                    STATUS_NOT_CONNECTED
                },
            ),
            ConnectionMode::Unknown(_) => ("unknown", "unknown"),
        };

        PeerStatus {
            device: self.peer.clone(),
            status: ConnectionInfo {
                mode: mode.to_owned(),
                mode_code: self.mode.into(),
                is_connected: matches!(self.mode, ConnectionMode::Direct | ConnectionMode::Relay),
                status_text: status_text.to_owned(),
                is_connecting: self.connecting,
                connect_failed: self.connect_failed,
                connect_message: self.connect_message.clone(),
            },
        }
    }

    fn begin_attempt(&mut self, request: &ConnectRequest) -> u64 {
        self.attempt += 1;
        self.mode = ConnectionMode::Disconnected;
        self.peer.alive = false;
        self.connecting = true;
        self.connect_failed = false;
        self.connect_message = MSG_CONNECTING.to_owned();
        self.connect_requests.push(request.clone());
        self.attempt
    }

    fn settle_attempt(&mut self, attempt: u64, request: &ConnectRequest) {
        if attempt != self.attempt || !self.connecting {
            return;
        }
        self.connecting = false;

        let accepted = self
            .settings
            .peer_password
            .as_deref()
            .is_none_or(|expected| expected == request.target_pwd);
        if accepted {
            self.mode = self.settings.link;
            self.connect_message.clear();
            self.peer = PeerDevice {
                client_id: request.target_id.clone(),
                ip: self.settings.peer_ip.clone(),
                alive: true,
                latency: Latency::Millis(SIMULATED_LATENCY_MS),
            };
            info!(target_id = %request.target_id, "simulated peer connected");
        } else {
            self.connect_failed = true;
            self.connect_message = "wrong password".to_owned();
            info!(target_id = %request.target_id, "simulated peer rejected password");
        }
    }
}

/// Shared handle to the simulated agent. Tests use it to steer the status the
/// console sees.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<AgentState>>,
}

impl AppState {
    #[must_use]
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AgentState::new(settings))),
        }
    }

    pub async fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.inner.read().await.connect_requests.clone()
    }

    /// Drops or restores the current peer link without a new attempt.
    pub async fn set_peer_alive(&self, alive: bool) {
        let mut agent = self.inner.write().await;
        agent.peer.alive = alive;
        agent.mode = if alive {
            agent.settings.link
        } else {
            ConnectionMode::Disconnected
        };
    }

    /// Ends the running attempt as failed with `message`.
    pub async fn fail_connection(&self, message: &str) {
        let mut agent = self.inner.write().await;
        agent.connecting = false;
        agent.connect_failed = true;
        agent.connect_message = message.to_owned();
    }

    /// Makes `GET /api/device` answer 404.
    pub async fn set_device_available(&self, available: bool) {
        self.inner.write().await.device_available = available;
    }

    /// Makes `GET /api/peerStatus` answer 404.
    pub async fn set_status_available(&self, available: bool) {
        self.inner.write().await.status_available = available;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AgentSettings::default())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/device", get(device_handler))
        .route("/api/peerStatus", get(peer_status_handler))
        .route("/api/connect", post(connect_handler))
        .route("/api/resetPassword", post(reset_password_handler))
        .layer(middleware::map_response(no_cache))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "mock agent listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

async fn device_handler(State(state): State<AppState>) -> Response {
    let agent = state.inner.read().await;
    if !agent.device_available {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(agent.device.clone()).into_response()
}

async fn peer_status_handler(State(state): State<AppState>) -> Response {
    let agent = state.inner.read().await;
    if !agent.status_available {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(agent.peer_status()).into_response()
}

fn rejected(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ConnectResponse {
            code: -1,
            message: Some(message.to_owned()),
        }),
    )
        .into_response()
}

async fn connect_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => {
            warn!("connect request rejected: {}", err);
            return rejected(StatusCode::BAD_REQUEST, "invalid request");
        }
    };
    if request.target_id.is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "target id must not be empty");
    }
    if request.target_id.len() != CONNECT_CODE_LEN {
        return rejected(StatusCode::BAD_REQUEST, "invalid target id");
    }
    if request.target_pwd.is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "password must not be empty");
    }

    let (attempt, delay) = {
        let mut agent = state.inner.write().await;
        (agent.begin_attempt(&request), agent.settings.connect_delay)
    };
    info!(target_id = %request.target_id, attempt, "connect requested");

    let settle_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        settle_state
            .inner
            .write()
            .await
            .settle_attempt(attempt, &request);
    });

    Json(ConnectResponse {
        code: 0,
        message: Some(MSG_CONNECTING.to_owned()),
    })
    .into_response()
}

async fn reset_password_handler(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => {
            warn!("reset request rejected: {}", err);
            return reset_rejected("invalid request");
        }
    };

    // An empty password is reported as a length problem, like the real agent.
    let verdict = match validate_password(&request.new_password) {
        Err(ValidationError::EmptyPassword) => Err(ValidationError::PasswordLength),
        other => other,
    };
    if let Err(err) = verdict {
        return reset_rejected(&err.to_string());
    }

    state.inner.write().await.device.password = request.new_password.clone();
    info!("device password changed");
    Json(ResetPasswordResponse {
        code: 0,
        password: Some(request.new_password),
        message: Some("password changed".to_owned()),
    })
    .into_response()
}

fn reset_rejected(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ResetPasswordResponse {
            code: -1,
            password: None,
            message: Some(message.to_owned()),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pwd: &str) -> ConnectRequest {
        ConnectRequest {
            target_id: "AB12CD34".to_owned(),
            target_pwd: pwd.to_owned(),
        }
    }

    #[test]
    fn idle_agent_reports_not_connected() {
        let agent = AgentState::new(AgentSettings::default());
        let status = agent.peer_status();
        assert_eq!(status.status.status_text, STATUS_NOT_CONNECTED);
        assert_eq!(status.status.mode_code, 2);
        assert!(!status.device.alive);
    }

    #[test]
    fn wrong_password_settles_as_failure() {
        let mut agent = AgentState::new(AgentSettings {
            peer_password: Some("654321".to_owned()),
            ..AgentSettings::default()
        });
        let attempt = agent.begin_attempt(&request("111111"));
        assert!(agent.peer_status().status.is_connecting);

        agent.settle_attempt(attempt, &request("111111"));
        let status = agent.peer_status();
        assert!(status.status.connect_failed);
        assert_eq!(status.status.connect_message, "wrong password");
        assert_eq!(status.status.status_text, MSG_CONNECT_FAILED);
    }

    #[test]
    fn stale_attempt_does_not_settle() {
        let mut agent = AgentState::new(AgentSettings::default());
        let first = agent.begin_attempt(&request("111111"));
        agent.begin_attempt(&request("222222"));
        agent.settle_attempt(first, &request("111111"));
        assert!(agent.peer_status().status.is_connecting);
    }

    #[test]
    fn relay_link_reports_server_relay() {
        let mut agent = AgentState::new(AgentSettings {
            link: ConnectionMode::Relay,
            ..AgentSettings::default()
        });
        let attempt = agent.begin_attempt(&request("123456"));
        agent.settle_attempt(attempt, &request("123456"));
        let status = agent.peer_status();
        assert!(status.device.alive);
        assert_eq!(status.status.status_text, "server relay");
        assert_eq!(status.status.mode_code, 1);
        assert!(status.status.is_connected);
    }
}
