//! Probers: one bounded reachability check per [`ProbeSpec`].
//!
//! The HTTP machinery is synchronous (libcurl `Easy` on a blocking thread);
//! DNS goes through the async [`DnsResolver`] collaborator. Every error is
//! folded into a failed [`ProbeResult`] before it leaves this module.

pub mod classify;
pub mod dns;
pub mod fallback;
pub mod http;
pub mod portal_api;
pub mod transport;

use rand::Rng;
use std::time::Instant;
use url::Url;

use crate::evaluation::{
    NETWORK_VALIDATION_PROBE_FALLBACK, NETWORK_VALIDATION_PROBE_HTTP,
    NETWORK_VALIDATION_PROBE_HTTPS,
};

pub use dns::{DnsResolver, RecordType, SystemResolver};
pub use http::{run_bandwidth_probe, run_probe, ProbeContext};
pub use transport::{CurlTransport, HttpRequest, HttpResponse, HttpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeType {
    Http,
    Https,
    Fallback,
    PortalApi,
    PrivateDns,
    Bandwidth,
}

impl ProbeType {
    /// Probe bit reported for this type, if it has one.
    pub fn probe_bit(self) -> Option<u32> {
        match self {
            ProbeType::Http => Some(NETWORK_VALIDATION_PROBE_HTTP),
            ProbeType::Https => Some(NETWORK_VALIDATION_PROBE_HTTPS),
            ProbeType::Fallback => Some(NETWORK_VALIDATION_PROBE_FALLBACK),
            ProbeType::PrivateDns => Some(crate::evaluation::NETWORK_VALIDATION_PROBE_PRIVDNS),
            ProbeType::PortalApi | ProbeType::Bandwidth => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    pub probe_type: ProbeType,
    pub url: Url,
}

impl ProbeSpec {
    pub fn new(probe_type: ProbeType, url: Url) -> Self {
        Self { probe_type, url }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Portal,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub probe_type: ProbeType,
    pub url: String,
    pub outcome: ProbeOutcome,
    pub redirect_url: Option<String>,
    pub http_status: Option<u32>,
    /// Whether the host lookup preceding the request succeeded.
    pub dns_resolved: bool,
}

impl ProbeResult {
    pub fn failure(spec: &ProbeSpec, dns_resolved: bool) -> Self {
        Self {
            probe_type: spec.probe_type,
            url: spec.url.to_string(),
            outcome: ProbeOutcome::Failure,
            redirect_url: None,
            http_status: None,
            dns_resolved,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }

    pub fn is_portal(&self) -> bool {
        self.outcome == ProbeOutcome::Portal
    }
}

/// One DNS lookup observed while probing, fed to the data stall detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsObservation {
    pub return_code: i32,
    pub at: Instant,
}

/// Source of pseudo-random indices for fallback selection.
pub trait IndexSource: Send + Sync {
    fn next_index(&self) -> u32;
}

/// [`IndexSource`] backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIndex;

impl IndexSource for RandomIndex {
    fn next_index(&self) -> u32 {
        rand::thread_rng().gen()
    }
}

/// Always returns the same index.
#[derive(Debug, Clone, Copy)]
pub struct FixedIndex(pub u32);

impl IndexSource for FixedIndex {
    fn next_index(&self) -> u32 {
        self.0
    }
}
