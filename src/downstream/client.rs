//! CalTopo position report client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{Ack, TrackerSink};
use crate::callsign::CallSign;
use crate::error::{RelayError, Result};
use crate::telemetry::PositionFix;
use crate::upstream::client::describe_transport_error;

/// Default CalTopo base URL
pub const DEFAULT_CALTOPO_BASE_URL: &str = "https://caltopo.com";

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY: usize = 200;

/// Client for CalTopo "Trackable Device" position reports
///
/// Reports go to `{base}/api/v1/position/report/{connect_key}?id={device_id}&lat=..&lng=..`.
#[derive(Debug)]
pub struct CalTopoClient {
    http: Client,
    base_url: String,
}

impl CalTopoClient {
    /// Create a client with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn report_url(&self, call_sign: &CallSign) -> String {
        format!(
            "{}/api/v1/position/report/{}",
            self.base_url,
            call_sign.connect_key()
        )
    }
}

/// Query parameters for one report
fn report_query(call_sign: &CallSign, fix: &PositionFix) -> [(&'static str, String); 3] {
    [
        ("id", call_sign.device_id().to_string()),
        ("lat", format!("{:.6}", fix.latitude())),
        ("lng", format!("{:.6}", fix.longitude())),
    ]
}

/// Map a response status to an ack or a sink error
fn classify_response(status: StatusCode, body: &str) -> Result<Ack> {
    if status.is_success() {
        return Ok(Ack {
            status: status.as_u16(),
        });
    }

    if status.is_client_error() {
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(RelayError::SinkRejected {
            status: status.as_u16(),
            body,
        });
    }

    Err(RelayError::SinkUnavailable(format!("HTTP {}", status.as_u16())))
}

#[async_trait]
impl TrackerSink for CalTopoClient {
    async fn post_fix(&self, call_sign: &CallSign, fix: &PositionFix) -> Result<Ack> {
        let url = self.report_url(call_sign);
        let query = report_query(call_sign, fix);

        let response = self
            .http
            .get(&url)
            .query(&query[..])
            .send()
            .await
            .map_err(|e| RelayError::SinkUnavailable(describe_transport_error(&e)))?;

        let status = response.status();
        // Body only matters for rejections; a failed read leaves it empty
        let body = response.text().await.unwrap_or_default();
        debug!(call_sign = %call_sign, status = status.as_u16(), "Position report sent");

        classify_response(status, &body)
    }
}
