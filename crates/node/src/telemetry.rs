//! Best-effort telemetry fan-out.
//!
//! Every configured sink gets its own attempt, run concurrently under its own
//! timeout, so a slow or broken sink cannot hold up the others. Nothing is
//! buffered: a reading that could not be delivered is simply dropped.

use async_trait::async_trait;
use futures::future::join_all;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::NetworkError;
use crate::link::Link;
use crate::mode::Mode;
use crate::sensor::Reading;
use crate::state::{EventKind, SharedStatus};

// ---------------------------------------------------------------------------
// Frame & sink configuration
// ---------------------------------------------------------------------------

/// What gets published: the reading plus the roof and mode at that moment.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryFrame {
    pub device_id: String,
    pub temperature: f32,
    pub humidity: f32,
    pub ldr_value: f32,
    pub roof_status: String,
    pub mode: Mode,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl TelemetryFrame {
    pub fn new(device_id: &str, reading: &Reading, roof_status: &str, mode: Mode) -> Self {
        Self {
            device_id: device_id.to_string(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            ldr_value: reading.light,
            roof_status: roof_status.to_string(),
            mode,
            captured_at: reading.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSettings {
    /// The hub's `/add_data`. Without `url` the backend URL is used.
    Store {
        #[serde(default)]
        url: Option<String>,
    },
    Ubidots {
        url: String,
        token: String,
    },
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        /// Defaults to `tele/<device_id>/reading`.
        #[serde(default)]
        topic: Option<String>,
    },
}

fn default_mqtt_port() -> u16 {
    1883
}

/// An external telemetry destination.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, frame: &TelemetryFrame) -> Result<(), NetworkError>;
}

// ---------------------------------------------------------------------------
// HTTP sinks
// ---------------------------------------------------------------------------

async fn post_json(
    http: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    body: &serde_json::Value,
    timeout: Duration,
) -> Result<(), NetworkError> {
    let mut req = http.post(url).json(body);
    if let Some(token) = token {
        req = req.header("X-Auth-Token", token);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| NetworkError::from_reqwest(url, e, timeout))?;

    // The hub answers 201; any 2xx counts as delivered.
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(NetworkError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        })
    }
}

/// Store sink: POST the frame to the hub's `/add_data`.
pub struct StoreSink {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl StoreSink {
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            url: format!("{}/add_data", base_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait]
impl TelemetrySink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    async fn send(&self, frame: &TelemetryFrame) -> Result<(), NetworkError> {
        let body = serde_json::to_value(frame).map_err(|e| NetworkError::Decode {
            url: self.url.clone(),
            detail: e.to_string(),
        })?;
        post_json(&self.http, &self.url, None, &body, self.timeout).await
    }
}

/// Dashboard feed in the Ubidots device-variable format.
pub struct UbidotsSink {
    http: reqwest::Client,
    url: String,
    token: String,
    timeout: Duration,
}

impl UbidotsSink {
    pub fn new(http: reqwest::Client, url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            http,
            url: url.to_string(),
            token: token.to_string(),
            timeout,
        }
    }

    pub fn body(frame: &TelemetryFrame) -> serde_json::Value {
        json!({
            "temperature": { "value": frame.temperature },
            "humidity": { "value": frame.humidity },
            "light": { "value": frame.ldr_value },
        })
    }
}

#[async_trait]
impl TelemetrySink for UbidotsSink {
    fn name(&self) -> &str {
        "ubidots"
    }

    async fn send(&self, frame: &TelemetryFrame) -> Result<(), NetworkError> {
        post_json(
            &self.http,
            &self.url,
            Some(&self.token),
            &Self::body(frame),
            self.timeout,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// MQTT sink
// ---------------------------------------------------------------------------

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    /// Must be called inside a tokio runtime: spawns the event loop task
    /// that keeps the broker connection alive.
    pub fn connect(device_id: &str, host: &str, port: u16, topic: Option<&str>) -> Self {
        let mut opts = MqttOptions::new(format!("canopy-node-{device_id}"), host, port);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        // Publish-only, but the event loop must still be polled.
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt sink connected"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt sink error: {e}. retrying...");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        let topic = topic
            .map(str::to_string)
            .unwrap_or_else(|| format!("tele/{device_id}/reading"));
        Self { client, topic }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn send(&self, frame: &TelemetryFrame) -> Result<(), NetworkError> {
        let payload = serde_json::to_vec(frame).map_err(|e| NetworkError::Decode {
            url: self.topic.clone(),
            detail: e.to_string(),
        })?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

/// Build the configured sinks. MQTT sinks spawn their event loops here.
pub fn build_sinks(
    settings: &[SinkSettings],
    device_id: &str,
    backend_url: &str,
    timeout: Duration,
) -> anyhow::Result<Vec<Box<dyn TelemetrySink>>> {
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()?;

    Ok(settings
        .iter()
        .map(|s| -> Box<dyn TelemetrySink> {
            match s {
                SinkSettings::Store { url } => Box::new(StoreSink::new(
                    http.clone(),
                    url.as_deref().unwrap_or(backend_url),
                    timeout,
                )),
                SinkSettings::Ubidots { url, token } => {
                    Box::new(UbidotsSink::new(http.clone(), url, token, timeout))
                }
                SinkSettings::Mqtt { host, port, topic } => {
                    Box::new(MqttSink::connect(device_id, host, *port, topic.as_deref()))
                }
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No connectivity at call time; nothing attempted.
    Skipped,
    Attempted(PublishReport),
    /// Ran past the tick's network budget and was abandoned.
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: Vec<String>,
    /// `(sink, error)` pairs.
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    pub fn all_failed(&self) -> bool {
        self.delivered.is_empty() && !self.failed.is_empty()
    }
}

pub struct TelemetryPublisher {
    sinks: Vec<Box<dyn TelemetrySink>>,
    link: Arc<dyn Link>,
    timeout: Duration,
    status: SharedStatus,
}

impl TelemetryPublisher {
    pub fn new(
        sinks: Vec<Box<dyn TelemetrySink>>,
        link: Arc<dyn Link>,
        timeout: Duration,
        status: SharedStatus,
    ) -> Self {
        Self {
            sinks,
            link,
            timeout,
            status,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn publish(&self, frame: &TelemetryFrame) -> PublishOutcome {
        if !self.link.is_up().await && !self.link.acquire().await {
            debug!("publish skipped: no link");
            return PublishOutcome::Skipped;
        }

        let attempts = self.sinks.iter().map(|sink| async move {
            let result = match tokio::time::timeout(self.timeout, sink.send(frame)).await {
                Ok(r) => r,
                Err(_) => Err(NetworkError::Timeout(self.timeout)),
            };
            (sink.name(), result)
        });

        let mut report = PublishReport::default();
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    debug!(sink = name, "telemetry delivered");
                    report.delivered.push(name.to_string());
                }
                Err(e) => {
                    warn!(sink = name, "telemetry failed: {e}");
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        if report.all_failed() {
            self.link.mark_down().await;
            self.status
                .write()
                .await
                .record(EventKind::Telemetry, "every sink failed".to_string());
        }
        PublishOutcome::Attempted(report)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
