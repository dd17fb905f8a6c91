//! Private DNS (DNS-over-TLS) validation.
//!
//! Strict mode must resolve the configured hostname before the network may
//! validate; opportunistic mode only runs a best-effort liveness query.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::error::DnsError;
use crate::probe::dns::{merge_families, query_family};
use crate::probe::{DnsResolver, RecordType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivateDnsMode {
    #[default]
    Off,
    Opportunistic,
    Strict,
}

/// Private DNS settings for the network; replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateDnsConfig {
    pub mode: PrivateDnsMode,
    /// Only meaningful in strict mode.
    pub hostname: Option<String>,
    pub resolved_addresses: Vec<IpAddr>,
}

impl PrivateDnsConfig {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn opportunistic() -> Self {
        Self {
            mode: PrivateDnsMode::Opportunistic,
            ..Self::default()
        }
    }

    pub fn strict(hostname: impl Into<String>) -> Self {
        Self {
            mode: PrivateDnsMode::Strict,
            hostname: Some(hostname.into()),
            resolved_addresses: Vec::new(),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.mode == PrivateDnsMode::Strict && self.hostname.is_some()
    }

    /// Same mode and hostname; resolved addresses are not compared.
    pub fn same_target(&self, other: &PrivateDnsConfig) -> bool {
        self.mode == other.mode && self.hostname == other.hostname
    }
}

/// Outcome of one private DNS validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateDnsReport {
    pub mode: PrivateDnsMode,
    /// Hostname the queries were issued for; compared against the current config on arrival.
    pub hostname: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub resolved: bool,
    pub live: bool,
}

impl PrivateDnsReport {
    /// Nothing resolved, nothing answered. The starting point of a pass, and
    /// what a pass that died is reported as.
    pub fn failed(config: &PrivateDnsConfig) -> Self {
        Self {
            mode: config.mode,
            hostname: config.hostname.clone(),
            addresses: Vec::new(),
            resolved: false,
            live: false,
        }
    }

    /// Strict mode needs the hostname to resolve and the liveness query to answer.
    /// Opportunistic mode never fails.
    pub fn passed(&self) -> bool {
        match self.mode {
            PrivateDnsMode::Strict => self.resolved && self.live,
            PrivateDnsMode::Opportunistic | PrivateDnsMode::Off => true,
        }
    }
}


/// Resolve the strict-mode hostname. AAAA addresses come before A addresses.
///
/// Each family has its own timeout, so one family hanging never fails the other.
pub async fn resolve_strict(
    resolver: &dyn DnsResolver,
    hostname: &str,
    timeout: Duration,
    concurrent: bool,
) -> Result<Vec<IpAddr>, DnsError> {
    let (v6, v4) = if concurrent {
        tokio::join!(
            query_family(resolver, hostname, RecordType::Aaaa, timeout),
            query_family(resolver, hostname, RecordType::A, timeout)
        )
    } else {
        let v6 = query_family(resolver, hostname, RecordType::Aaaa, timeout).await;
        let v4 = query_family(resolver, hostname, RecordType::A, timeout).await;
        (v6, v4)
    };
    merge_families(v6, v4).map_err(|e| match e {
        DnsError::NoData(h) if h.is_empty() => DnsError::NoData(hostname.to_string()),
        other => other,
    })
}

/// Single-use name under `suffix`, so no cache along the path can answer it.
pub fn liveness_probe_name(suffix: &str) -> String {
    let label: u64 = rand::thread_rng().gen();
    format!("{:016x}{}", label, suffix)
}

/// Adapter routing `query` through `query_private`.
struct PrivateRoute<'a>(&'a dyn DnsResolver);

#[async_trait::async_trait]
impl DnsResolver for PrivateRoute<'_> {
    async fn query(&self, hostname: &str, record_type: RecordType) -> Result<Vec<IpAddr>, DnsError> {
        self.0.query_private(hostname, record_type).await
    }
}

/// Query a fresh random name through the private resolver.
pub async fn probe_liveness(resolver: &dyn DnsResolver, suffix: &str, timeout: Duration) -> bool {
    let name = liveness_probe_name(suffix);
    let route = PrivateRoute(resolver);
    match query_family(&route, &name, RecordType::Aaaa, timeout).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(name = %name, "private DNS liveness query failed: {}", e);
            false
        }
    }
}

/// Run one validation pass for `config`.
pub async fn validate(
    resolver: &dyn DnsResolver,
    config: &PrivateDnsConfig,
    timeout: Duration,
    probe_suffix: &str,
    concurrent: bool,
) -> PrivateDnsReport {
    let mut report = PrivateDnsReport::failed(config);
    match config.mode {
        PrivateDnsMode::Off => {
            report.resolved = true;
            report.live = true;
        }
        PrivateDnsMode::Opportunistic => {
            report.resolved = true;
            report.live = probe_liveness(resolver, probe_suffix, timeout).await;
            if !report.live {
                tracing::info!("opportunistic private DNS liveness check failed; ignored");
            }
        }
        PrivateDnsMode::Strict => {
            let Some(hostname) = config.hostname.as_deref() else {
                return report;
            };
            match resolve_strict(resolver, hostname, timeout, concurrent).await {
                Ok(addrs) => {
                    report.addresses = addrs;
                    report.resolved = true;
                    report.live = probe_liveness(resolver, probe_suffix, timeout).await;
                }
                Err(e) => {
                    tracing::info!(hostname, "strict private DNS hostname did not resolve: {}", e);
                }
            }
        }
    }
    report
}
