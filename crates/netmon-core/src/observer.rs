//! Outbound notifications to the connectivity controller.

use std::net::IpAddr;
use tokio::sync::mpsc;

use crate::private_dns::PrivateDnsMode;
use crate::probe::portal_api::CaptivePortalData;
use crate::stall::{DataStallSnapshot, StallReport};

/// Receives validation results. Called synchronously from the monitor task,
/// so implementations must not block.
pub trait ValidationObserver: Send + Sync {
    /// Exactly once per completed cycle. `redirect_url` is set only for a portal.
    fn network_tested(&self, result: u32, probes_succeeded: u32, redirect_url: Option<&str>);

    /// Only when the attempted/succeeded probe bits actually changed.
    fn probe_status_changed(&self, probes_completed: u32, probes_succeeded: u32);

    fn data_stall_suspected(&self, report: &StallReport);

    fn portal_data_changed(&self, data: &CaptivePortalData);

    fn private_dns_resolved(&self, hostname: &str, addresses: &[IpAddr], mode: PrivateDnsMode);

    fn show_login_prompt(&self);

    fn hide_login_prompt(&self);

    fn data_stall_snapshot(&self, _snapshot: &DataStallSnapshot) {}
}

/// One notification, as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    NetworkTested {
        result: u32,
        probes_succeeded: u32,
        redirect_url: Option<String>,
    },
    ProbeStatusChanged {
        probes_completed: u32,
        probes_succeeded: u32,
    },
    DataStallSuspected(StallReport),
    PortalDataChanged(CaptivePortalData),
    PrivateDnsResolved {
        hostname: String,
        addresses: Vec<IpAddr>,
        mode: PrivateDnsMode,
    },
    ShowLoginPrompt,
    HideLoginPrompt,
    DataStallSnapshot(DataStallSnapshot),
}

/// Forwards every notification into an unbounded channel for async consumers.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: MonitorEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl ValidationObserver for ChannelObserver {
    fn network_tested(&self, result: u32, probes_succeeded: u32, redirect_url: Option<&str>) {
        self.send(MonitorEvent::NetworkTested {
            result,
            probes_succeeded,
            redirect_url: redirect_url.map(str::to_string),
        });
    }

    fn probe_status_changed(&self, probes_completed: u32, probes_succeeded: u32) {
        self.send(MonitorEvent::ProbeStatusChanged {
            probes_completed,
            probes_succeeded,
        });
    }

    fn data_stall_suspected(&self, report: &StallReport) {
        self.send(MonitorEvent::DataStallSuspected(report.clone()));
    }

    fn portal_data_changed(&self, data: &CaptivePortalData) {
        self.send(MonitorEvent::PortalDataChanged(data.clone()));
    }

    fn private_dns_resolved(&self, hostname: &str, addresses: &[IpAddr], mode: PrivateDnsMode) {
        self.send(MonitorEvent::PrivateDnsResolved {
            hostname: hostname.to_string(),
            addresses: addresses.to_vec(),
            mode,
        });
    }

    fn show_login_prompt(&self) {
        self.send(MonitorEvent::ShowLoginPrompt);
    }

    fn hide_login_prompt(&self) {
        self.send(MonitorEvent::HideLoginPrompt);
    }

    fn data_stall_snapshot(&self, snapshot: &DataStallSnapshot) {
        self.send(MonitorEvent::DataStallSnapshot(snapshot.clone()));
    }
}
