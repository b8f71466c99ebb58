//! Backend client: the device's side of `/get_control` and `/get_mode`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::NetworkError;
use crate::mode::Mode;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// Poll `/get_control` every N control ticks.
    pub poll_every_ticks: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            timeout_secs: 10,
            poll_every_ticks: 1,
        }
    }
}

/// One answer from the poll point: the backend's mode and at most one
/// command, already marked processed on the backend side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPoll {
    pub mode: Option<Mode>,
    pub command: Option<String>,
}

/// Where remote commands come from.
#[async_trait]
pub trait CommandFeed: Send + Sync {
    async fn poll(&self) -> Result<ControlPoll, NetworkError>;
    async fn fetch_mode(&self) -> Result<Mode, NetworkError>;
}

#[derive(Debug, Deserialize)]
struct ControlResponse {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    control: Option<String>,
}

impl From<ControlResponse> for ControlPoll {
    fn from(r: ControlResponse) -> Self {
        let mode = r.mode.and_then(|m| {
            m.parse::<Mode>()
                .inspect_err(|e| warn!("backend sent {e}"))
                .ok()
        });
        let command = r
            .control
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self { mode, command }
    }
}

#[derive(Debug, Deserialize)]
struct ModeResponse {
    mode: String,
}

pub struct BackendClient {
    http: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(settings: &BackendSettings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: settings.url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let url = self.endpoint(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(&url, e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url,
                status: status.as_u16(),
            });
        }

        resp.json::<T>().await.map_err(|e| NetworkError::Decode {
            url,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl CommandFeed for BackendClient {
    async fn poll(&self) -> Result<ControlPoll, NetworkError> {
        let poll: ControlPoll = self.get_json::<ControlResponse>("get_control").await?.into();
        if let Some(cmd) = &poll.command {
            debug!(command = %cmd, "backend delivered command");
        }
        Ok(poll)
    }

    async fn fetch_mode(&self) -> Result<Mode, NetworkError> {
        let url = self.endpoint("get_mode");
        let body = self.get_json::<ModeResponse>("get_mode").await?;
        body.mode
            .parse::<Mode>()
            .map_err(|detail| NetworkError::Decode { url, detail })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ControlPoll {
        serde_json::from_str::<ControlResponse>(json).unwrap().into()
    }

    #[test]
    fn control_with_command() {
        let poll = parse(r#"{"status":"success","mode":"MANUAL","control":"open"}"#);
        assert_eq!(poll.mode, Some(Mode::Manual));
        assert_eq!(poll.command.as_deref(), Some("open"));
    }

    #[test]
    fn control_null_means_no_command() {
        let poll = parse(r#"{"status":"success","mode":"AUTO","control":null}"#);
        assert_eq!(poll, ControlPoll { mode: Some(Mode::Auto), command: None });
    }

    #[test]
    fn blank_control_is_no_command() {
        assert_eq!(parse(r#"{"mode":"auto","control":"  "}"#).command, None);
    }

    #[test]
    fn unknown_mode_is_dropped() {
        let poll = parse(r#"{"mode":"HYBRID","control":"close"}"#);
        assert_eq!(poll.mode, None);
        assert_eq!(poll.command.as_deref(), Some("close"));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = BackendClient::new(&BackendSettings {
            url: "http://hub.local:5000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://hub.local:5000");
        assert_eq!(client.endpoint("/get_control"), "http://hub.local:5000/get_control");
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let client = BackendClient::new(&BackendSettings {
            url: "http://127.0.0.1:1".into(),
            timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();
        assert!(client.poll().await.is_err());
    }
}
