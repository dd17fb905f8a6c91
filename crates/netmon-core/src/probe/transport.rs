//! HTTP transport used by probes: a blocking GET with redirects disabled.

use std::net::IpAddr;
use std::str;
use std::time::Duration;
use url::Url;

use crate::control::AbortToken;
use crate::error::ProbeError;

/// Upper bound on the body bytes kept for classification.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub user_agent: String,
    /// Applied to connect and to the whole transfer.
    pub timeout: Duration,
    pub max_body_bytes: usize,
    /// Addresses from the probe's own lookup; pinned so the request uses them.
    pub resolved: Vec<IpAddr>,
}

impl HttpRequest {
    pub fn new(url: Url, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url,
            user_agent: user_agent.into(),
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            resolved: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First header named `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }
}

/// Performs one request. Runs in the calling thread; call from `spawn_blocking`.
pub trait HttpTransport: Send + Sync {
    fn fetch(&self, request: &HttpRequest, abort: &AbortToken) -> Result<HttpResponse, ProbeError>;
}

/// libcurl-backed transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurlTransport;

impl HttpTransport for CurlTransport {
    fn fetch(&self, request: &HttpRequest, abort: &AbortToken) -> Result<HttpResponse, ProbeError> {
        let mut header_lines: Vec<String> = Vec::new();
        let mut body: Vec<u8> = Vec::new();
        let limit = request.max_body_bytes;

        let mut easy = curl::easy::Easy::new();
        easy.url(request.url.as_str())?;
        easy.follow_location(false)?;
        easy.connect_timeout(request.timeout)?;
        easy.timeout(request.timeout)?;
        easy.useragent(&request.user_agent)?;
        easy.progress(true)?;

        if let Some(pin) = resolve_pin(&request.url, &request.resolved) {
            let mut list = curl::easy::List::new();
            list.append(&pin)?;
            easy.resolve(list)?;
        }

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    // A new status line starts a new header block (e.g. after 100 Continue).
                    if s.starts_with("HTTP/") {
                        header_lines.clear();
                    }
                    header_lines.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.write_function(|data| {
                let room = limit.saturating_sub(body.len());
                body.extend_from_slice(&data[..data.len().min(room)]);
                Ok(data.len())
            })?;
            transfer.progress_function(|_, _, _, _| !abort.is_aborted())?;
            transfer.perform()
        };
        if let Err(e) = performed {
            if abort.is_aborted() {
                return Err(ProbeError::Aborted);
            }
            return Err(ProbeError::Curl(e));
        }

        let status = easy.response_code()?;
        Ok(HttpResponse {
            status,
            headers: parse_header_lines(&header_lines),
            body,
        })
    }
}

/// `host:port:addr[,addr]` entry for CURLOPT_RESOLVE, or `None` for IP-literal hosts.
fn resolve_pin(url: &Url, resolved: &[IpAddr]) -> Option<String> {
    let host = url.domain()?;
    let port = url.port_or_known_default()?;
    if resolved.is_empty() {
        return None;
    }
    let addrs: Vec<String> = resolved
        .iter()
        .map(|ip| match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{}]", v6),
        })
        .collect();
    Some(format!("{}:{}:{}", host, port, addrs.join(",")))
}

fn parse_header_lines(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}
