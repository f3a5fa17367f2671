//! Skydio cloud API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::extract;
use super::TelemetrySource;
use crate::error::{RelayError, Result};
use crate::telemetry::{PositionFix, VehicleStatus};

/// Default Skydio API base URL
pub const DEFAULT_SKYDIO_BASE_URL: &str = "https://api.skydio.com/api";

/// HTTP client for the Skydio fleet API
///
/// Authenticates every request with `Authorization: ApiToken <token>`.
pub struct SkydioClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl std::fmt::Debug for SkydioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkydioClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SkydioClient {
    /// Create a client with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `HttpClient` if the base URL is not a valid http(s) URL or the
    /// underlying reqwest client cannot be built.
    pub fn new(base_url: &str, api_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            RelayError::HttpClient(format!("invalid base URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::HttpClient(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_token: api_token.into(),
        })
    }

    /// Endpoint URL with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET an endpoint and return the unwrapped `data` payload
    async fn get_data(&self, segments: &[&str]) -> Result<Value> {
        let url = self.url(segments);
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .header("Authorization", format!("ApiToken {}", self.api_token))
            .send()
            .await
            .map_err(|e| RelayError::SourceUnavailable(describe_transport_error(&e)))?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::SourceUnavailable(format!("invalid JSON response: {}", e)))?;

        extract::unwrap_envelope(body)
    }

    /// Probe the API and log what it knows about the vehicle
    ///
    /// Used once at startup; a failure is logged, never fatal, since the relay
    /// loop retries on its own.
    pub async fn check_connection(&self, vehicle_id: &str) -> Option<VehicleStatus> {
        match self.fetch_status(vehicle_id).await {
            Ok(status) => {
                info!(
                    vehicle = %status.serial,
                    name = status.name.as_deref().unwrap_or("unknown"),
                    flight_status = status.flight_status.as_deref().unwrap_or("unknown"),
                    online = status.connected,
                    live_streaming = status.live_streaming,
                    battery_percent = status.battery_percent.unwrap_or(0.0),
                    "Found vehicle in fleet"
                );
                Some(status)
            }
            Err(e) => {
                warn!(vehicle = vehicle_id, error = %e, "Initial vehicle status check failed");
                None
            }
        }
    }
}

/// Map an HTTP status to a source error, `None` for success
fn classify_status(status: StatusCode) -> Option<RelayError> {
    if status.is_success() {
        return None;
    }

    let detail = format!("HTTP {}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(RelayError::SourceAuthError(detail))
        }
        _ => Some(RelayError::SourceUnavailable(detail)),
    }
}

pub(crate) fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    }
}

#[async_trait]
impl TelemetrySource for SkydioClient {
    async fn fetch_status(&self, vehicle_id: &str) -> Result<VehicleStatus> {
        let data = self.get_data(&["v0", "vehicles"]).await?;
        extract::vehicle_status(&data, vehicle_id)
    }

    async fn fetch_telemetry(&self, vehicle_id: &str) -> Result<PositionFix> {
        let data = self
            .get_data(&["v0", "vehicles", vehicle_id, "telemetry"])
            .await?;
        extract::position_fix(&data, Utc::now())
    }
}
