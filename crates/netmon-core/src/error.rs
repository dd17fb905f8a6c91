//! Typed errors for probes, DNS lookups, the portal API and configuration.
//!
//! None of these cross the monitor boundary: workers convert them into a
//! failed [`ProbeResult`](crate::probe::ProbeResult) or a logged fallback.

use thiserror::Error;

/// Failure of a single HTTP/HTTPS/fallback probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Target could not be parsed or has no host.
    #[error("invalid probe URL `{0}`")]
    InvalidUrl(String),
    /// Host lookup for the probe target failed.
    #[error("DNS lookup for {host} failed: {source}")]
    Dns {
        host: String,
        #[source]
        source: DnsError,
    },
    /// libcurl reported an error (connect, TLS handshake, timeout, ...).
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),
    /// The owning cycle was superseded while the transfer ran.
    #[error("probe aborted")]
    Aborted,
    /// The worker running the probe panicked or was cancelled.
    #[error("probe worker failed: {0}")]
    Worker(String),
}

/// Failure of one DNS query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("query timed out")]
    Timeout,
    #[error("no addresses for {0}")]
    NoData(String),
    #[error("resolver error: {0}")]
    Resolver(String),
}

impl DnsError {
    /// Return code recorded in the data stall log.
    pub fn return_code(&self) -> i32 {
        match self {
            DnsError::Timeout => crate::stall::DNS_RETURN_TIMEOUT,
            DnsError::NoData(_) | DnsError::Resolver(_) => crate::stall::DNS_RETURN_ERROR,
        }
    }
}

/// Portal API (RFC 8908 style) fetch or parse failure.
#[derive(Debug, Error)]
pub enum PortalApiError {
    #[error("portal API URL must be https: {0}")]
    NotHttps(String),
    #[error("portal API returned HTTP {0}")]
    Status(u32),
    #[error("malformed portal API document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// A configuration value that could not be used; the lookup falls through.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{key}`: expected {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("`{key}`: invalid URL `{value}`")]
    InvalidUrl { key: String, value: String },
    #[error("`{key}`: invalid regex: {source}")]
    InvalidRegex {
        key: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid fallback probe spec `{0}`")]
    InvalidFallbackSpec(String),
}
