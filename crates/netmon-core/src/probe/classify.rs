//! Response classification: success, portal or failure.

use regex::Regex;
use url::Url;

use super::transport::HttpResponse;
use super::ProbeOutcome;
use crate::config::MonitorConfig;

/// Status codes treated as a captive portal redirect.
pub const PORTAL_REDIRECT_CODES: [u32; 5] = [301, 302, 303, 307, 308];

/// Body-content rules for 200 responses.
#[derive(Debug, Clone, Default)]
pub struct ContentRules {
    success: Option<Regex>,
    failure: Option<Regex>,
    min_len: u64,
    max_len: u64,
}

impl ContentRules {
    pub fn new(success: Option<&str>, failure: Option<&str>, min_len: u64, max_len: u64) -> Self {
        Self {
            success: success.and_then(|p| compile_full_match("success_content_regex", p)),
            failure: failure.and_then(|p| compile_full_match("failure_content_regex", p)),
            min_len,
            max_len,
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(
            cfg.success_content_regex.as_deref(),
            cfg.failure_content_regex.as_deref(),
            cfg.min_content_length,
            cfg.max_content_length,
        )
    }

    /// Body length strictly between the configured bounds.
    fn length_in_range(&self, len: u64) -> bool {
        self.min_len < len && len < self.max_len
    }
}

/// Compile `pattern` anchored at both ends; an invalid regex never matches.
pub(crate) fn compile_full_match(key: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(key, "ignoring invalid regex: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: ProbeOutcome,
    pub redirect_url: Option<String>,
}

impl Classification {
    fn success() -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            redirect_url: None,
        }
    }

    fn failure() -> Self {
        Self {
            outcome: ProbeOutcome::Failure,
            redirect_url: None,
        }
    }

    pub(crate) fn portal(redirect_url: String) -> Self {
        Self {
            outcome: ProbeOutcome::Portal,
            redirect_url: Some(redirect_url),
        }
    }
}

/// Reported portal URL: an absolute `Location`, else the probe URL itself.
pub fn redirect_target(probe_url: &Url, location: Option<&str>) -> String {
    location
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .and_then(|l| Url::parse(l).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| probe_url.to_string())
}

pub fn classify_response(
    probe_url: &Url,
    response: &HttpResponse,
    rules: &ContentRules,
) -> Classification {
    match response.status {
        204 => Classification::success(),
        code if PORTAL_REDIRECT_CODES.contains(&code) => {
            Classification::portal(redirect_target(probe_url, response.location()))
        }
        200 => classify_ok_body(probe_url, response, rules),
        _ => Classification::failure(),
    }
}

fn classify_ok_body(probe_url: &Url, response: &HttpResponse, rules: &ContentRules) -> Classification {
    // Nothing to show a login page with.
    if response.body.is_empty() {
        return Classification::failure();
    }
    let text = decode_body(&response.body, extract_charset(response.content_type()));
    if rules.failure.as_ref().is_some_and(|re| re.is_match(&text)) {
        return Classification::portal(probe_url.to_string());
    }
    let len = response.body.len() as u64;
    if rules.length_in_range(len) && rules.success.as_ref().is_some_and(|re| re.is_match(&text)) {
        return Classification::success();
    }
    Classification::portal(probe_url.to_string())
}

/// Character sets understood when decoding probe bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
}

/// `charset=` parameter of a content type, case-insensitive; unknown names are UTF-8.
pub fn extract_charset(content_type: Option<&str>) -> Charset {
    let Some(ct) = content_type else {
        return Charset::Utf8;
    };
    let name = ct.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    });
    match name.as_deref() {
        Some("iso-8859-1" | "iso8859-1" | "latin1" | "l1" | "iso_8859-1") => Charset::Latin1,
        _ => Charset::Utf8,
    }
}

pub fn decode_body(body: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Utf8 => String::from_utf8_lossy(body).into_owned(),
        Charset::Latin1 => body.iter().map(|&b| b as char).collect(),
    }
}
