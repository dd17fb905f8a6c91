//! Captive portal API client (`application/captive+json`).

use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use super::http::fetch_blocking;
use super::transport::HttpRequest;
use super::ProbeContext;
use crate::error::PortalApiError;

#[derive(Debug, Deserialize)]
struct PortalApiDocument {
    captive: bool,
    #[serde(rename = "user-portal-url")]
    user_portal_url: Option<String>,
    #[serde(rename = "venue-info-url")]
    venue_info_url: Option<String>,
    #[serde(rename = "bytes-remaining")]
    bytes_remaining: Option<i64>,
    #[serde(rename = "seconds-remaining")]
    seconds_remaining: Option<i64>,
}

/// Parsed portal API state as reported through `portalDataChanged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptivePortalData {
    pub captive: bool,
    pub user_portal_url: Option<String>,
    pub venue_info_url: Option<String>,
    pub byte_limit: Option<i64>,
    /// Unix epoch milliseconds; request time + `seconds-remaining` * 1000.
    pub expiry_time_millis: Option<i64>,
    pub refresh_time_millis: i64,
}

impl CaptivePortalData {
    /// Worth reporting: the network says it is not captive, or names a login page.
    pub fn is_reportable(&self) -> bool {
        !self.captive || self.user_portal_url.is_some()
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Accept only absolute https URLs for the API endpoint.
pub fn validate_api_url(raw: &str) -> Result<Url, PortalApiError> {
    match Url::parse(raw.trim()) {
        Ok(url) if url.scheme() == "https" && url.host_str().is_some() => Ok(url),
        _ => Err(PortalApiError::NotHttps(raw.to_string())),
    }
}

fn web_url(field: &str, raw: Option<String>) -> Option<String> {
    let raw = raw?;
    match Url::parse(raw.trim()) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Some(u.to_string()),
        _ => {
            tracing::warn!(field, "ignoring invalid portal API URL `{}`", raw);
            None
        }
    }
}

pub fn parse_document(
    body: &[u8],
    request_time_millis: i64,
) -> Result<CaptivePortalData, PortalApiError> {
    let doc: PortalApiDocument = serde_json::from_slice(body)?;
    Ok(CaptivePortalData {
        captive: doc.captive,
        user_portal_url: web_url("user-portal-url", doc.user_portal_url),
        venue_info_url: web_url("venue-info-url", doc.venue_info_url),
        byte_limit: doc.bytes_remaining,
        expiry_time_millis: doc
            .seconds_remaining
            .map(|s| request_time_millis.saturating_add(s.saturating_mul(1000))),
        refresh_time_millis: request_time_millis,
    })
}

/// GET the API document on a blocking worker and parse it.
pub async fn fetch_portal_api(
    ctx: &ProbeContext,
    url: &Url,
) -> Result<CaptivePortalData, PortalApiError> {
    let request_time = now_millis();
    let mut request = HttpRequest::new(
        url.clone(),
        ctx.config.user_agent.clone(),
        ctx.config.probe_timeout(),
    );
    request.max_body_bytes = 16 * 1024;
    let response = fetch_blocking(ctx, request).await?;
    if response.status != 200 {
        return Err(PortalApiError::Status(response.status));
    }
    tracing::debug!(url = %url, "portal API answered");
    parse_document(&response.body, request_time)
}
