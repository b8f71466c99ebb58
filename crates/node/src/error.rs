//! Error kinds the node branches on. Plumbing errors (startup, hardware
//! init) stay `anyhow`; these are the ones callers match against.

use std::time::Duration;

/// Hardware read failure. Degrades the tick to the safe default target.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("{sensor}: read failed: {detail}")]
    ReadFailed { sensor: &'static str, detail: String },

    #[error("{sensor}: checksum mismatch")]
    Checksum { sensor: &'static str },
}

/// A cloud or backend call that did not complete. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("mqtt publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

impl NetworkError {
    /// Classify a reqwest failure; client-side timeouts get their own kind.
    pub fn from_reqwest(url: &str, source: reqwest::Error, timeout: Duration) -> Self {
        if source.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Request {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A second activation while the relay is on. Rejected, never queued.
    #[error("relay already active")]
    AlreadyActive,

    #[error("relay duration {requested:?} outside 1s..={max:?}")]
    InvalidDuration { requested: Duration, max: Duration },

    #[error("relay output failed: {0}")]
    Output(#[source] anyhow::Error),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
}

/// The servo drive refused a position. The only loop-fatal error.
#[derive(Debug, thiserror::Error)]
#[error("actuator fault moving roof to {angle}°: {source}")]
pub struct ActuatorFault {
    pub angle: u8,
    #[source]
    pub source: anyhow::Error,
}
