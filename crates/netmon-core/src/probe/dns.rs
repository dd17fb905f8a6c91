//! DNS resolver collaborator and the per-probe host lookup.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::DnsObservation;
use crate::error::DnsError;
use crate::stall::DNS_RETURN_SUCCESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub fn matches(self, ip: &IpAddr) -> bool {
        match self {
            RecordType::A => ip.is_ipv4(),
            RecordType::Aaaa => ip.is_ipv6(),
        }
    }
}

/// Resolver used by probes and private DNS validation.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolve `hostname` through the network's ordinary resolver.
    async fn query(&self, hostname: &str, record_type: RecordType)
        -> Result<Vec<IpAddr>, DnsError>;

    /// Resolve through the configured private DNS server.
    async fn query_private(
        &self,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Vec<IpAddr>, DnsError> {
        self.query(hostname, record_type).await
    }
}

/// Host resolver via `getaddrinfo` (tokio's blocking lookup pool).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn query(
        &self,
        hostname: &str,
        record_type: RecordType,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let addrs = tokio::net::lookup_host((hostname, 0u16))
            .await
            .map_err(|e| DnsError::Resolver(e.to_string()))?;
        let mut out: Vec<IpAddr> = Vec::new();
        for ip in addrs.map(|sa| sa.ip()).filter(|ip| record_type.matches(ip)) {
            if !out.contains(&ip) {
                out.push(ip);
            }
        }
        if out.is_empty() {
            return Err(DnsError::NoData(hostname.to_string()));
        }
        Ok(out)
    }
}

/// One family's query under its own timeout.
pub(crate) async fn query_family(
    resolver: &dyn DnsResolver,
    hostname: &str,
    record_type: RecordType,
    timeout: Duration,
) -> Result<Vec<IpAddr>, DnsError> {
    match tokio::time::timeout(timeout, resolver.query(hostname, record_type)).await {
        Ok(res) => res,
        Err(_) => Err(DnsError::Timeout),
    }
}

/// Query AAAA and A concurrently, each under its own timeout; AAAA answers come first.
///
/// Succeeds if either family returns addresses. IP literals resolve to themselves
/// without a query and produce no observation.
pub async fn resolve_host(
    resolver: &dyn DnsResolver,
    host: &str,
    timeout: Duration,
) -> (Result<Vec<IpAddr>, DnsError>, Option<DnsObservation>) {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return (Ok(vec![ip]), None);
    }

    // A family that never answers must not discard the other one's addresses.
    let (v6, v4) = tokio::join!(
        query_family(resolver, host, RecordType::Aaaa, timeout),
        query_family(resolver, host, RecordType::A, timeout)
    );
    let result = merge_families(v6, v4);
    let return_code = match &result {
        Ok(_) => DNS_RETURN_SUCCESS,
        Err(e) => e.return_code(),
    };
    let observation = DnsObservation {
        return_code,
        at: Instant::now(),
    };
    tracing::debug!(host, return_code, "probe DNS lookup");
    (result, Some(observation))
}

/// AAAA results then A results; an error only if both failed (timeout wins).
pub(crate) fn merge_families(
    v6: Result<Vec<IpAddr>, DnsError>,
    v4: Result<Vec<IpAddr>, DnsError>,
) -> Result<Vec<IpAddr>, DnsError> {
    match (v6, v4) {
        (Ok(mut a), Ok(b)) => {
            a.extend(b);
            if a.is_empty() {
                Err(DnsError::NoData(String::new()))
            } else {
                Ok(a)
            }
        }
        (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
            if a.is_empty() {
                Err(e)
            } else {
                Ok(a)
            }
        }
        (Err(DnsError::Timeout), Err(_)) | (Err(_), Err(DnsError::Timeout)) => {
            Err(DnsError::Timeout)
        }
        (Err(e), Err(_)) => Err(e),
    }
}

/// Loopback, RFC 1918, link-local, CGNAT or IPv6 ULA/link-local.
pub fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || (o[0] == 100 && (o[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    struct Scripted;

    #[async_trait]
    impl DnsResolver for Scripted {
        async fn query(&self, host: &str, rt: RecordType) -> Result<Vec<IpAddr>, DnsError> {
            match (host, rt) {
                ("dual.example", RecordType::A) => Ok(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))]),
                ("dual.example", RecordType::Aaaa) => {
                    Ok(vec![IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))])
                }
                ("v4only.example", RecordType::A) => {
                    Ok(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2))])
                }
                ("stuck-v6.example", RecordType::A) => {
                    Ok(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 3))])
                }
                ("slow.example", _) | ("stuck-v6.example", RecordType::Aaaa) => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(vec![])
                }
                _ => Err(DnsError::NoData(host.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn aaaa_results_come_first() {
        let (res, obs) = resolve_host(&Scripted, "dual.example", Duration::from_secs(1)).await;
        let addrs = res.unwrap();
        assert!(addrs[0].is_ipv6());
        assert!(addrs[1].is_ipv4());
        assert_eq!(obs.unwrap().return_code, DNS_RETURN_SUCCESS);
    }

    #[tokio::test]
    async fn one_family_failing_is_not_fatal() {
        let (res, _) = resolve_host(&Scripted, "v4only.example", Duration::from_secs(1)).await;
        assert_eq!(res.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let (res, obs) = resolve_host(&Scripted, "slow.example", Duration::from_millis(20)).await;
        assert_eq!(res, Err(DnsError::Timeout));
        assert_eq!(obs.unwrap().return_code, crate::stall::DNS_RETURN_TIMEOUT);
    }

    #[tokio::test]
    async fn hanging_aaaa_keeps_the_a_answer() {
        let (res, obs) =
            resolve_host(&Scripted, "stuck-v6.example", Duration::from_millis(50)).await;
        assert_eq!(res.unwrap(), vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 3))]);
        assert_eq!(obs.unwrap().return_code, DNS_RETURN_SUCCESS);
    }

    #[tokio::test]
    async fn ip_literal_needs_no_query() {
        let (res, obs) = resolve_host(&Scripted, "[::1]", Duration::from_millis(20)).await;
        assert_eq!(res.unwrap(), vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]);
        assert!(obs.is_none());
    }

    #[test]
    fn private_address_ranges() {
        assert!(is_private_address(&"10.1.2.3".parse().unwrap()));
        assert!(is_private_address(&"192.168.0.1".parse().unwrap()));
        assert!(is_private_address(&"100.64.0.1".parse().unwrap()));
        assert!(is_private_address(&"fd00::1".parse().unwrap()));
        assert!(is_private_address(&"fe80::1".parse().unwrap()));
        assert!(!is_private_address(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_address(&"2001:4860::8888".parse().unwrap()));
    }
}
