use std::{future::Future, time::Duration};

use natun_core::{
    ConnectRequest, ConnectResponse, LocalDevice, PeerStatus, ResetPasswordRequest,
    ResetPasswordResponse,
};
use reqwest::StatusCode;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEVICE_PATH: &str = "api/device";
const PEER_STATUS_PATH: &str = "api/peerStatus";
const CONNECT_PATH: &str = "api/connect";
const RESET_PASSWORD_PATH: &str = "api/resetPassword";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid agent url: {0}")]
    Url(#[from] url::ParseError),
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} answered HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// The four calls the console makes against the local agent.
///
/// `Ok(None)` from the read endpoints means the agent has nothing to report yet
/// (it answered 404).
pub trait AgentApi: Send + Sync + 'static {
    fn device(&self) -> impl Future<Output = Result<Option<LocalDevice>, ApiError>> + Send;

    fn peer_status(&self) -> impl Future<Output = Result<Option<PeerStatus>, ApiError>> + Send;

    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<ConnectResponse, ApiError>> + Send;

    fn reset_password(
        &self,
        request: ResetPasswordRequest,
    ) -> impl Future<Output = Result<ResetPasswordResponse, ApiError>> + Send;
}

#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base: Url,
}

impl AgentClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            base: with_trailing_slash(base),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
    ) -> Result<Option<T>, ApiError> {
        let url = self.base.join(endpoint)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Request { endpoint, source })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(endpoint, "agent has no data yet");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|source| ApiError::Decode { endpoint, source })
    }

    /// The agent answers rejected posts with an error status and a JSON body
    /// carrying `code`/`message`, so the body is decoded whatever the status.
    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.base.join(endpoint)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Request { endpoint, source })?;

        let status = response.status();
        match response.json::<T>().await {
            Ok(decoded) => Ok(decoded),
            Err(_) if !status.is_success() => Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            }),
            Err(source) => Err(ApiError::Decode { endpoint, source }),
        }
    }
}

impl AgentApi for AgentClient {
    async fn device(&self) -> Result<Option<LocalDevice>, ApiError> {
        self.get_optional(DEVICE_PATH).await
    }

    async fn peer_status(&self) -> Result<Option<PeerStatus>, ApiError> {
        self.get_optional(PEER_STATUS_PATH).await
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse, ApiError> {
        self.post(CONNECT_PATH, &request).await
    }

    async fn reset_password(
        &self,
        request: ResetPasswordRequest,
    ) -> Result<ResetPasswordResponse, ApiError> {
        self.post(RESET_PASSWORD_PATH, &request).await
    }
}

/// `Url::join` replaces the last path segment unless the base ends with `/`.
fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_the_base_path() {
        let client = AgentClient::new(
            Url::parse("http://127.0.0.1:8898/agent").expect("url"),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .expect("client");
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:8898/agent/");
        assert_eq!(
            client.base_url().join(PEER_STATUS_PATH).expect("join").as_str(),
            "http://127.0.0.1:8898/agent/api/peerStatus"
        );
    }

    #[test]
    fn bare_host_resolves_to_root_api() {
        let client = AgentClient::new(
            Url::parse("http://localhost:8898").expect("url"),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .expect("client");
        assert_eq!(
            client.base_url().join(DEVICE_PATH).expect("join").as_str(),
            "http://localhost:8898/api/device"
        );
    }
}
