use std::fmt;

use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_CLIENT_ID: &str = "loading...";
pub const PLACEHOLDER_PEER_ID: &str = "waiting for connection";
pub const PLACEHOLDER_IP: &str = "0.0.0.0";
pub const PLACEHOLDER_NAT_TYPE: &str = "unknown";
pub const PLACEHOLDER_LATENCY: &str = "-";
pub const MODE_DISCONNECTED_TEXT: &str = "disconnected";
pub const STATUS_NOT_CONNECTED: &str = "not connected";

/// This machine as reported by `GET /api/device`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalDevice {
    pub client_id: String,
    #[serde(rename = "IP", alias = "ip")]
    pub ip: String,
    pub nat_type: String,
    pub password: String,
}

impl LocalDevice {
    /// True once a real device record replaced the placeholder.
    pub fn is_loaded(&self) -> bool {
        self.client_id != PLACEHOLDER_CLIENT_ID
    }
}

impl Default for LocalDevice {
    fn default() -> Self {
        Self {
            client_id: PLACEHOLDER_CLIENT_ID.to_owned(),
            ip: PLACEHOLDER_IP.to_owned(),
            nat_type: PLACEHOLDER_NAT_TYPE.to_owned(),
            password: String::new(),
        }
    }
}

/// Round-trip time to the peer. The agent sends milliseconds, but the
/// placeholder (and some agent builds) use a string such as `"-"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Latency {
    Millis(i64),
    Text(String),
}

impl Default for Latency {
    fn default() -> Self {
        Latency::Text(PLACEHOLDER_LATENCY.to_owned())
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Millis(ms) => write!(f, "{ms} ms"),
            Latency::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerDevice {
    pub client_id: String,
    #[serde(rename = "IP", alias = "ip")]
    pub ip: String,
    pub alive: bool,
    pub latency: Latency,
}

impl Default for PeerDevice {
    fn default() -> Self {
        Self {
            client_id: PLACEHOLDER_PEER_ID.to_owned(),
            ip: PLACEHOLDER_IP.to_owned(),
            alive: false,
            latency: Latency::default(),
        }
    }
}

/// How the agent currently reaches the peer (`modeCode` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Direct,
    Relay,
    Disconnected,
    Unknown(i32),
}

impl From<i32> for ConnectionMode {
    fn from(code: i32) -> Self {
        match code {
            0 => ConnectionMode::Direct,
            1 => ConnectionMode::Relay,
            2 => ConnectionMode::Disconnected,
            other => ConnectionMode::Unknown(other),
        }
    }
}

impl From<ConnectionMode> for i32 {
    fn from(mode: ConnectionMode) -> Self {
        match mode {
            ConnectionMode::Direct => 0,
            ConnectionMode::Relay => 1,
            ConnectionMode::Disconnected => 2,
            ConnectionMode::Unknown(other) => other,
        }
    }
}

/// The agent's own view of the connection attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionInfo {
    pub mode: String,
    pub mode_code: i32,
    pub is_connected: bool,
    pub status_text: String,
    pub is_connecting: bool,
    pub connect_failed: bool,
    pub connect_message: String,
}

impl ConnectionInfo {
    pub fn connection_mode(&self) -> ConnectionMode {
        ConnectionMode::from(self.mode_code)
    }

    /// Snapshot used between a connect request and the first fresh poll.
    pub fn pending() -> Self {
        Self {
            status_text: String::new(),
            ..Self::default()
        }
    }

    /// Snapshot used for a request the agent refused before dispatch.
    pub fn rejected(message: &str) -> Self {
        Self {
            connect_failed: true,
            connect_message: message.to_owned(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            mode: MODE_DISCONNECTED_TEXT.to_owned(),
            mode_code: ConnectionMode::Disconnected.into(),
            is_connected: false,
            status_text: STATUS_NOT_CONNECTED.to_owned(),
            is_connecting: false,
            connect_failed: false,
            connect_message: String::new(),
        }
    }
}

/// Body of `GET /api/peerStatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PeerStatus {
    pub device: PeerDevice,
    pub status: ConnectionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub target_id: String,
    pub target_pwd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectResponse {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectResponse {
    pub fn is_accepted(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetPasswordResponse {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
