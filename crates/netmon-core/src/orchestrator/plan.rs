use url::Url;

use crate::config::MonitorConfig;
use crate::network::LinkConfig;
use crate::probe::fallback::{choose_fallback, FallbackChoice};
use crate::probe::portal_api::validate_api_url;
use crate::probe::{ProbeSpec, ProbeType};

/// Test override URLs must expire within this window to be honoured.
const TEST_URL_MAX_LIFETIME_MS: i64 = 10 * 60 * 1000;

/// Probes for one cycle, fixed when the cycle starts.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub http: Vec<ProbeSpec>,
    pub https: Vec<ProbeSpec>,
    pub fallback: Option<FallbackChoice>,
    pub portal_api: Option<Url>,
}

impl ProbePlan {
    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.https.is_empty() && self.portal_api.is_none()
    }
}

fn test_override_live(cfg: &MonitorConfig, now_millis: i64) -> bool {
    let Some(expiry) = cfg.test_url_expiration_millis else {
        return false;
    };
    let expiry = expiry as i64;
    expiry > now_millis && expiry - now_millis <= TEST_URL_MAX_LIFETIME_MS
}

fn parse_probe_url(raw: &str, source: &str) -> Option<Url> {
    match Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Some(url)
        }
        _ => {
            tracing::warn!(source, "ignoring invalid probe URL `{}`", raw);
            None
        }
    }
}

/// Pick the URL set for one probe type.
///
/// Precedence: live localhost test override, configured list, provider URL, default.
fn select_urls(
    test_override: Option<&str>,
    override_live: bool,
    list: &[String],
    provider: Option<&str>,
    default: &str,
) -> Vec<Url> {
    if override_live {
        if let Some(url) = test_override.and_then(|raw| parse_probe_url(raw, "test override")) {
            if url.host_str() == Some("localhost") {
                return vec![url];
            }
            tracing::warn!(url = %url, "test override URL must point at localhost");
        }
    }
    let listed: Vec<Url> = list
        .iter()
        .filter_map(|raw| parse_probe_url(raw, "url list"))
        .collect();
    if !listed.is_empty() {
        return listed;
    }
    if let Some(url) = provider.and_then(|raw| parse_probe_url(raw, "provider setting")) {
        return vec![url];
    }
    parse_probe_url(default, "default").into_iter().collect()
}

/// Build the probe set for a cycle.
///
/// `first_attempt` and `index` only affect which fallback entry is chosen.
pub fn build_plan(
    cfg: &MonitorConfig,
    link: &LinkConfig,
    now_millis: i64,
    first_attempt: bool,
    index: u32,
) -> ProbePlan {
    let override_live = test_override_live(cfg, now_millis);
    let http = select_urls(
        cfg.test_http_url.as_deref(),
        override_live,
        &cfg.http_urls,
        cfg.provider_http_url.as_deref(),
        &cfg.http_url,
    );
    let https = if cfg.use_https {
        select_urls(
            cfg.test_https_url.as_deref(),
            override_live,
            &cfg.https_urls,
            cfg.provider_https_url.as_deref(),
            &cfg.https_url,
        )
    } else {
        Vec::new()
    };
    let portal_api = link
        .portal_api_url
        .as_deref()
        .and_then(|raw| match validate_api_url(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("ignoring portal API endpoint: {}", e);
                None
            }
        });

    ProbePlan {
        http: http
            .into_iter()
            .map(|u| ProbeSpec::new(ProbeType::Http, u))
            .collect(),
        https: https
            .into_iter()
            .map(|u| ProbeSpec::new(ProbeType::Https, u))
            .collect(),
        fallback: choose_fallback(cfg, first_attempt, index),
        portal_api,
    }
}
