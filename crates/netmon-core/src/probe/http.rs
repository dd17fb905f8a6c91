//! One HTTP/HTTPS/fallback probe: host lookup, GET, classification.

use std::sync::Arc;
use std::time::Instant;

use super::classify::{classify_response, Classification, ContentRules};
use super::dns::{is_private_address, resolve_host, DnsResolver};
use super::fallback::FallbackSpec;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use super::{DnsObservation, ProbeOutcome, ProbeResult, ProbeSpec};
use crate::config::MonitorConfig;
use crate::control::AbortToken;
use crate::error::ProbeError;

/// Everything a probe worker needs; cheap to clone into tasks.
#[derive(Clone)]
pub struct ProbeContext {
    pub transport: Arc<dyn HttpTransport>,
    pub resolver: Arc<dyn DnsResolver>,
    pub config: Arc<MonitorConfig>,
    pub rules: Arc<ContentRules>,
    pub abort: AbortToken,
}

/// Result of [`run_probe`] plus the DNS lookup it made, if any.
#[derive(Debug, Clone)]
pub struct ProbeRun {
    pub result: ProbeResult,
    pub dns: Option<DnsObservation>,
}

/// Run the blocking transport on the blocking pool; a panic becomes a worker error.
pub(crate) async fn fetch_blocking(
    ctx: &ProbeContext,
    request: HttpRequest,
) -> Result<HttpResponse, ProbeError> {
    let transport = Arc::clone(&ctx.transport);
    let abort = ctx.abort.clone();
    tokio::task::spawn_blocking(move || transport.fetch(&request, &abort))
        .await
        .map_err(|e| ProbeError::Worker(e.to_string()))?
}

/// Execute one probe. Never fails: every error is a [`ProbeOutcome::Failure`].
///
/// `fallback_spec` switches classification to the spec's status/location regexes.
pub async fn run_probe(
    ctx: &ProbeContext,
    spec: &ProbeSpec,
    fallback_spec: Option<&FallbackSpec>,
) -> ProbeRun {
    let started = Instant::now();
    let Some(host) = spec.url.host_str() else {
        tracing::warn!(url = %spec.url, "probe URL has no host");
        return ProbeRun {
            result: ProbeResult::failure(spec, false),
            dns: None,
        };
    };

    let (lookup, dns) =
        resolve_host(ctx.resolver.as_ref(), host, ctx.config.dns_probe_timeout()).await;
    let addresses = match lookup {
        Ok(addrs) => addrs,
        Err(source) => {
            let err = ProbeError::Dns {
                host: host.to_string(),
                source,
            };
            tracing::debug!(probe = ?spec.probe_type, url = %spec.url, "probe failed: {}", err);
            return ProbeRun {
                result: ProbeResult::failure(spec, false),
                dns,
            };
        }
    };

    let mut request = HttpRequest::new(
        spec.url.clone(),
        ctx.config.user_agent.clone(),
        ctx.config.probe_timeout(),
    );
    request.resolved = addresses.clone();

    let response = match fetch_blocking(ctx, request).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(probe = ?spec.probe_type, url = %spec.url, "probe failed: {}", e);
            return ProbeRun {
                result: ProbeResult::failure(spec, true),
                dns,
            };
        }
    };

    let mut classification = match fallback_spec {
        Some(fs) => fs.classify(&response),
        None => classify_response(&spec.url, &response, &ctx.rules),
    };
    if classification.outcome == ProbeOutcome::Portal
        && ctx.config.private_ip_no_internet
        && !addresses.is_empty()
        && addresses.iter().all(is_private_address)
    {
        tracing::info!(url = %spec.url, "portal response from private address treated as failure");
        classification = Classification {
            outcome: ProbeOutcome::Failure,
            redirect_url: None,
        };
    }

    tracing::debug!(
        probe = ?spec.probe_type,
        url = %spec.url,
        status = response.status,
        outcome = ?classification.outcome,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "probe finished"
    );
    ProbeRun {
        result: ProbeResult {
            probe_type: spec.probe_type,
            url: spec.url.to_string(),
            outcome: classification.outcome,
            redirect_url: classification.redirect_url,
            http_status: Some(response.status),
            dns_resolved: true,
        },
        dns,
    }
}

/// Bandwidth check: the configured URL must answer 2xx within the bandwidth timeout.
pub async fn run_bandwidth_probe(ctx: &ProbeContext, url: &url::Url) -> bool {
    let mut request = HttpRequest::new(
        url.clone(),
        ctx.config.user_agent.clone(),
        ctx.config.bandwidth_timeout(),
    );
    request.max_body_bytes = 0;
    match fetch_blocking(ctx, request).await {
        Ok(resp) => (200..300).contains(&resp.status),
        Err(e) => {
            tracing::debug!(url = %url, "bandwidth probe failed: {}", e);
            false
        }
    }
}
