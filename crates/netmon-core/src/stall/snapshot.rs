//! Telemetry snapshot built once per declared data stall.

use std::time::Instant;

use super::dns::DnsStallDetector;
use super::tcp::TcpHealth;
use super::{StallReport, DATA_STALL_EVALUATION_TYPE_DNS, DATA_STALL_EVALUATION_TYPE_TCP};
use crate::network::{Capabilities, Transport};

/// Value used for fields whose signal was not active.
pub const UNSPECIFIED: i32 = -1;

/// Transport recorded in the snapshot. Anything but cellular/wifi is `Other`
/// and carries no radio details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTransport {
    Cellular,
    Wifi,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiBand {
    Band2Ghz,
    Band5Ghz,
    Band6Ghz,
    Unknown,
}

impl WifiBand {
    pub fn from_frequency(mhz: u32) -> Self {
        match mhz {
            2400..=2500 => WifiBand::Band2Ghz,
            4900..=5900 => WifiBand::Band5Ghz,
            5925..=7125 => WifiBand::Band6Ghz,
            _ => WifiBand::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiInfo {
    pub frequency_mhz: u32,
    pub rssi_dbm: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellularInfo {
    pub radio_type: String,
    pub is_roaming: bool,
    pub network_mccmnc: String,
    pub sim_mccmnc: String,
    pub signal_strength: i32,
}

/// Radio details provided by the host.
pub trait RadioInfo: Send + Sync {
    fn wifi_info(&self) -> Option<WifiInfo>;
    fn cellular_info(&self) -> Option<CellularInfo>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRadioInfo;

impl RadioInfo for NoRadioInfo {
    fn wifi_info(&self) -> Option<WifiInfo> {
        None
    }

    fn cellular_info(&self) -> Option<CellularInfo> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStallSnapshot {
    /// Signals that fired.
    pub evaluation_types: u32,
    pub validation_result: u32,
    pub transport: SnapshotTransport,
    pub wifi: Option<WifiInfo>,
    pub wifi_band: Option<WifiBand>,
    pub cellular: Option<CellularInfo>,
    pub tcp_fail_rate: i32,
    pub tcp_sent_since_last_recv: i32,
    /// `(return code, ms since the event)` for the most recent lookups, oldest first.
    pub dns_events: Vec<(i32, u64)>,
}

pub struct SnapshotInputs<'a> {
    pub report: &'a StallReport,
    pub capabilities: &'a Capabilities,
    pub validation_result: u32,
    pub radio: &'a dyn RadioInfo,
    pub tcp: &'a dyn TcpHealth,
    pub dns: &'a DnsStallDetector,
    pub dns_threshold: u32,
    pub now: Instant,
}

pub fn build_snapshot(inputs: SnapshotInputs<'_>) -> DataStallSnapshot {
    let transport = if inputs.capabilities.has_transport(Transport::Cellular) {
        SnapshotTransport::Cellular
    } else if inputs.capabilities.has_transport(Transport::Wifi) {
        SnapshotTransport::Wifi
    } else {
        SnapshotTransport::Other
    };
    let wifi = match transport {
        SnapshotTransport::Wifi => inputs.radio.wifi_info(),
        _ => None,
    };
    let cellular = match transport {
        SnapshotTransport::Cellular => inputs.radio.cellular_info(),
        _ => None,
    };

    let methods = inputs.report.detection_methods;
    let (tcp_fail_rate, tcp_sent_since_last_recv) = if methods & DATA_STALL_EVALUATION_TYPE_TCP != 0 {
        (
            inputs.tcp.latest_packet_fail_percentage(),
            inputs.tcp.sent_since_last_recv(),
        )
    } else {
        (UNSPECIFIED, UNSPECIFIED)
    };
    let dns_events = if methods & DATA_STALL_EVALUATION_TYPE_DNS != 0 {
        inputs
            .dns
            .recent_events(inputs.dns_threshold as usize)
            .into_iter()
            .map(|e| {
                let age = inputs.now.saturating_duration_since(e.at).as_millis() as u64;
                (e.return_code, age)
            })
            .collect()
    } else {
        Vec::new()
    };

    DataStallSnapshot {
        evaluation_types: methods,
        validation_result: inputs.validation_result,
        transport,
        wifi_band: wifi.as_ref().map(|w| WifiBand::from_frequency(w.frequency_mhz)),
        wifi,
        cellular,
        tcp_fail_rate,
        tcp_sent_since_last_recv,
        dns_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stall::tcp::NoTcpHealth;
    use crate::stall::{DNS_RETURN_SUCCESS, DNS_RETURN_TIMEOUT};
    use std::time::Duration;

    struct Radio;

    impl RadioInfo for Radio {
        fn wifi_info(&self) -> Option<WifiInfo> {
            Some(WifiInfo {
                frequency_mhz: 5180,
                rssi_dbm: -60,
            })
        }

        fn cellular_info(&self) -> Option<CellularInfo> {
            Some(CellularInfo {
                radio_type: "LTE".to_string(),
                is_roaming: false,
                network_mccmnc: "310260".to_string(),
                sim_mccmnc: "310260".to_string(),
                signal_strength: 3,
            })
        }
    }

    fn report(methods: u32) -> StallReport {
        StallReport {
            detection_methods: methods,
            dns_consecutive_timeouts: 2,
            tcp_metrics: None,
        }
    }

    #[test]
    fn dns_snapshot_on_wifi() {
        let t0 = Instant::now();
        let mut dns = DnsStallDetector::new(2);
        dns.accumulate(DNS_RETURN_SUCCESS, t0);
        dns.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_millis(100));
        dns.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_millis(200));
        let r = report(DATA_STALL_EVALUATION_TYPE_DNS);
        let snap = build_snapshot(SnapshotInputs {
            report: &r,
            capabilities: &Capabilities::wifi(),
            validation_result: 1,
            radio: &Radio,
            tcp: &NoTcpHealth,
            dns: &dns,
            dns_threshold: 2,
            now: t0 + Duration::from_millis(300),
        });
        assert_eq!(snap.transport, SnapshotTransport::Wifi);
        assert_eq!(snap.wifi_band, Some(WifiBand::Band5Ghz));
        assert!(snap.cellular.is_none());
        assert_eq!(snap.tcp_fail_rate, UNSPECIFIED);
        assert_eq!(snap.tcp_sent_since_last_recv, UNSPECIFIED);
        assert_eq!(snap.dns_events, vec![(DNS_RETURN_TIMEOUT, 200), (DNS_RETURN_TIMEOUT, 100)]);
    }

    #[test]
    fn other_transport_has_no_radio_fields() {
        let caps = Capabilities {
            transports: vec![Transport::Ethernet],
            ..Capabilities::wifi()
        };
        let r = report(DATA_STALL_EVALUATION_TYPE_TCP);
        let snap = build_snapshot(SnapshotInputs {
            report: &r,
            capabilities: &caps,
            validation_result: 1,
            radio: &Radio,
            tcp: &NoTcpHealth,
            dns: &DnsStallDetector::new(5),
            dns_threshold: 5,
            now: Instant::now(),
        });
        assert_eq!(snap.transport, SnapshotTransport::Other);
        assert!(snap.wifi.is_none() && snap.cellular.is_none());
        assert_eq!(snap.tcp_fail_rate, 0);
        assert!(snap.dns_events.is_empty());
    }

    #[test]
    fn cellular_snapshot_carries_cell_info() {
        let r = report(DATA_STALL_EVALUATION_TYPE_DNS);
        let snap = build_snapshot(SnapshotInputs {
            report: &r,
            capabilities: &Capabilities::cellular(),
            validation_result: 1,
            radio: &Radio,
            tcp: &NoTcpHealth,
            dns: &DnsStallDetector::new(5),
            dns_threshold: 5,
            now: Instant::now(),
        });
        assert_eq!(snap.transport, SnapshotTransport::Cellular);
        assert_eq!(snap.cellular.unwrap().radio_type, "LTE");
        assert!(snap.wifi_band.is_none());
    }
}
