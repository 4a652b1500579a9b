use thiserror::Error;

pub mod api;
pub mod recent;
pub mod reconcile;
pub mod store;
pub mod validate;

pub use api::{
    ConnectRequest, ConnectResponse, ConnectionInfo, ConnectionMode, Latency, LocalDevice,
    PeerDevice, PeerStatus, ResetPasswordRequest, ResetPasswordResponse,
};
pub use recent::{RecentDevice, RecentDeviceStore, find_recent};
pub use reconcile::{
    ConnectIntent, ConnectTarget, ConnectionPhase, ConnectionPresentation, Effects, ReconcileEvent,
    Reconciler, evaluate,
};
pub use store::{KeyValueStore, MemoryStore};
pub use validate::{validate_connect_code, validate_connect_password, validate_password};

pub const CONNECT_CODE_LEN: usize = 8;
pub const PASSWORD_LEN: usize = 6;
pub const MAX_RECENT_DEVICES: usize = 3;
pub const RECENT_DEVICES_KEY: &str = "recentDevices";

pub const MSG_CONNECT_FAILED: &str = "connect failed";
pub const MSG_CONNECTING: &str = "connecting...";
pub const MSG_REQUEST_FAILED: &str = "request failed, check that the agent is running";

/// Operator input rejected before anything is sent to the agent.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("enter a new password")]
    EmptyPassword,
    #[error("password must be 6 digits")]
    PasswordLength,
    #[error("password may contain digits only")]
    PasswordNotNumeric,
    #[error("enter a valid 8-character connect code")]
    ConnectCode,
    #[error("enter the 6-digit connect password")]
    ConnectPassword,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialize(String),
}
