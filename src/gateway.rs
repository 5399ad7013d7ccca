//! ==============================================================================
//! gateway.rs - data fetch client for the sensor gateway
//! ==============================================================================
//!
//! purpose:
//!     thin async functions over the gateway's REST surface. each call issues
//!     exactly one request and parses the JSON answer into domain types.
//!     there are NO retries here; retry policy belongs to the query cache.
//!
//! endpoints (relative to the configured base url):
//!     GET  /sensors                   -> [1, 2, 3]
//!     GET  /sensors/{id}/readings     -> [{timestamp, temperature, ...}, ...]
//!     GET  /sensors/{id}              -> latest reading
//!     POST /sensors/{id}              <- {"lightOn": bool}, -> reading
//!
//! relationships:
//!     - used by: console.rs (through the Gateway trait)
//!     - configured by: config.rs (GatewayConfig)
//!
//! ==============================================================================

use crate::config::GatewayConfig;
use crate::domain::{LightAck, LightCommand, Reading, ReadingsWindow, SensorId};
use crate::error::{ClientError, Result};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

/// The operations the core needs from the gateway.
///
/// `HttpGateway` is the real implementation; tests drive the core with an
/// in-memory one.
pub trait Gateway: Send + Sync {
    fn fetch_sensor_list(&self) -> impl Future<Output = Result<Vec<SensorId>>> + Send;

    fn fetch_readings(
        &self,
        sensor: SensorId,
        window: ReadingsWindow,
    ) -> impl Future<Output = Result<Vec<Reading>>> + Send;

    /// `Ok(None)` when the gateway has never heard from the sensor.
    fn fetch_latest_reading(
        &self,
        sensor: SensorId,
    ) -> impl Future<Output = Result<Option<Reading>>> + Send;

    fn set_light_state(
        &self,
        sensor: SensorId,
        light_on: bool,
    ) -> impl Future<Output = Result<LightAck>> + Send;
}

// ==============================================================================
// http implementation
// ==============================================================================

#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        // timeouts surface as network errors from send()/bytes()
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(ClientError::network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T> {
        let mut request = self.client.get(self.url(path));
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::protocol(format!("GET {} returned {}", path, status)));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Gateway for HttpGateway {
    async fn fetch_sensor_list(&self) -> Result<Vec<SensorId>> {
        // the gateway encodes an empty list as null
        let ids: Option<Vec<SensorId>> = self.get_json("/sensors", &[]).await?;
        Ok(ids.unwrap_or_default())
    }

    async fn fetch_readings(&self, sensor: SensorId, window: ReadingsWindow) -> Result<Vec<Reading>> {
        let path = format!("/sensors/{}/readings", sensor);
        let readings: Option<Vec<Reading>> = self.get_json(&path, &window.query_pairs()).await?;
        Ok(readings.unwrap_or_default())
    }

    async fn fetch_latest_reading(&self, sensor: SensorId) -> Result<Option<Reading>> {
        let path = format!("/sensors/{}", sensor);
        let reading: Option<Reading> = self.get_json(&path, &[]).await?;

        // unknown sensors come back as an all-zero row
        Ok(reading.filter(|r| r.timestamp != 0))
    }

    async fn set_light_state(&self, sensor: SensorId, light_on: bool) -> Result<LightAck> {
        let path = format!("/sensors/{}", sensor);
        let response = self
            .client
            .post(self.url(&path))
            .json(&LightCommand { light_on })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Err(ClientError::Conflict(sensor));
        }
        if !status.is_success() {
            return Err(ClientError::protocol(format!("POST {} returned {}", path, status)));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(ClientError::protocol(format!("POST {} returned an empty body", path)));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

// ==============================================================================
// in-memory gateway for tests
// ==============================================================================
