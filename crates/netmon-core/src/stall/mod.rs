//! Data stall detection: DNS timeout streaks and TCP health, combined.
//!
//! A stall is only considered once the network validated. Both signals are
//! rate-limited by the time since the last validation probe, and both require
//! the capabilities to still call for validation.

mod dns;
mod snapshot;
mod tcp;

use std::time::{Duration, Instant};

pub use dns::{DnsEvent, DnsStallDetector};
pub use snapshot::{
    build_snapshot, CellularInfo, DataStallSnapshot, NoRadioInfo, RadioInfo, SnapshotInputs,
    SnapshotTransport, WifiBand, WifiInfo, UNSPECIFIED,
};
pub use tcp::{NoTcpHealth, TcpHealth};

use crate::config::MonitorConfig;
use crate::network::Capabilities;

pub const DATA_STALL_EVALUATION_TYPE_DNS: u32 = 0x01;
pub const DATA_STALL_EVALUATION_TYPE_TCP: u32 = 0x02;

pub const DNS_RETURN_SUCCESS: i32 = 0;
/// Generic resolver failure (no data, SERVFAIL, ...).
pub const DNS_RETURN_ERROR: i32 = 2;
pub const DNS_RETURN_TIMEOUT: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallSettings {
    pub evaluation_types: u32,
    pub dns_threshold: u32,
    pub valid_dns_window: Duration,
    pub min_evaluate_interval: Duration,
    pub validate_tethering: bool,
}

impl StallSettings {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            evaluation_types: cfg.data_stall_evaluation_type,
            dns_threshold: cfg.consecutive_dns_timeout_threshold,
            valid_dns_window: Duration::from_millis(cfg.valid_dns_time_threshold_ms),
            min_evaluate_interval: Duration::from_millis(cfg.min_stall_evaluate_interval_ms),
            validate_tethering: cfg.validate_tethering_networks,
        }
    }

    fn dns_enabled(&self) -> bool {
        self.evaluation_types & DATA_STALL_EVALUATION_TYPE_DNS != 0
    }

    fn tcp_enabled(&self) -> bool {
        self.evaluation_types & DATA_STALL_EVALUATION_TYPE_TCP != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpMetrics {
    pub fail_percentage: i32,
    pub sent_since_last_recv: i32,
}

/// Payload of `dataStallSuspected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub detection_methods: u32,
    pub dns_consecutive_timeouts: u32,
    pub tcp_metrics: Option<TcpMetrics>,
}

/// DNS log, settings and last-probe time; owned by the monitor task.
#[derive(Debug, Clone)]
pub struct StallEvaluator {
    settings: StallSettings,
    dns: DnsStallDetector,
    last_probe_at: Option<Instant>,
}

impl StallEvaluator {
    pub fn new(settings: StallSettings) -> Self {
        Self {
            dns: DnsStallDetector::new(settings.dns_threshold),
            settings,
            last_probe_at: None,
        }
    }

    pub fn set_settings(&mut self, settings: StallSettings) {
        self.dns.resize(settings.dns_threshold);
        self.settings = settings;
    }

    pub fn settings(&self) -> &StallSettings {
        &self.settings
    }

    pub fn record_dns(&mut self, return_code: i32, at: Instant) {
        self.dns.accumulate(return_code, at);
    }

    /// A validation cycle started; stalls are not re-declared within the minimum interval.
    pub fn mark_probe(&mut self, at: Instant) {
        self.last_probe_at = Some(at);
    }

    pub fn dns_detector(&self) -> &DnsStallDetector {
        &self.dns
    }

    pub fn tcp_enabled(&self) -> bool {
        self.settings.tcp_enabled()
    }

    pub fn evaluate(
        &self,
        now: Instant,
        capabilities: &Capabilities,
        tcp: &dyn TcpHealth,
    ) -> Option<StallReport> {
        if let Some(last) = self.last_probe_at {
            if now.saturating_duration_since(last) < self.settings.min_evaluate_interval {
                return None;
            }
        }
        if !capabilities.eligible_for_stall_detection(self.settings.validate_tethering) {
            return None;
        }

        let mut methods = 0;
        let mut tcp_metrics = None;
        if self.settings.dns_enabled()
            && self.dns.is_suspected(
                self.settings.dns_threshold,
                self.settings.valid_dns_window,
                now,
            )
        {
            methods |= DATA_STALL_EVALUATION_TYPE_DNS;
        }
        if self.settings.tcp_enabled()
            && tcp.latest_received_count() == 0
            && tcp.is_stall_suspected()
        {
            methods |= DATA_STALL_EVALUATION_TYPE_TCP;
            tcp_metrics = Some(TcpMetrics {
                fail_percentage: tcp.latest_packet_fail_percentage(),
                sent_since_last_recv: tcp.sent_since_last_recv(),
            });
        }
        if methods == 0 {
            return None;
        }
        Some(StallReport {
            detection_methods: methods,
            dns_consecutive_timeouts: self.dns.consecutive_timeouts(),
            tcp_metrics,
        })
    }
}
