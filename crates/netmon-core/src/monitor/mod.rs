//! Per-network validation state machine.
//!
//! [`NetworkMonitor::spawn`] starts one task that owns every piece of state
//! for the network. The handle only sends messages; probe workers report back
//! into the same task, which drops anything tagged with a stale generation.

mod actor;
mod cycle;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::network::{Capabilities, LinkConfig};
use crate::observer::ValidationObserver;
use crate::private_dns::{PrivateDnsConfig, PrivateDnsMode};
use crate::probe::{CurlTransport, DnsResolver, HttpTransport, IndexSource, RandomIndex, SystemResolver};
use crate::stall::{NoRadioInfo, NoTcpHealth, RadioInfo, TcpHealth};

use actor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// Created, not yet connected.
    Default,
    /// A cycle (or the private DNS stage) is running, or a failed network waits for its next check.
    Evaluating,
    Validated,
    CaptivePortalDetected,
    Disconnected,
}

/// What the user did in the portal login app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalAppResponse {
    /// Logged in or closed the app: check again now.
    Dismissed,
    /// Use the network as it is; report VALID until disconnect.
    WantedAsIs,
    /// Stop re-checking this network automatically.
    Unwanted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthStatus {
    NotRun,
    Running,
    Passed,
    Failed,
    Skipped,
}

/// Read-only view of the monitor, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub state: ValidationState,
    pub probes_attempted: u32,
    pub probes_succeeded: u32,
    pub evaluation_result: u32,
    pub redirect_url: Option<String>,
    /// Delay of the pending automatic re-check, if one is scheduled.
    pub reevaluate_delay_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub cycle_in_flight: bool,
    pub cycles_started: u32,
    pub partial_accepted: bool,
    pub bandwidth: BandwidthStatus,
    pub private_dns_mode: PrivateDnsMode,
    pub dns_consecutive_timeouts: u32,
}

/// Collaborators injected into the monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    pub observer: Arc<dyn ValidationObserver>,
    pub transport: Arc<dyn HttpTransport>,
    pub resolver: Arc<dyn DnsResolver>,
    pub tcp: Arc<dyn TcpHealth>,
    pub radio: Arc<dyn RadioInfo>,
    pub index_source: Arc<dyn IndexSource>,
}

impl MonitorDeps {
    /// libcurl transport, system resolver, no TCP or radio statistics.
    pub fn new(observer: Arc<dyn ValidationObserver>) -> Self {
        Self {
            observer,
            transport: Arc::new(CurlTransport),
            resolver: Arc::new(SystemResolver),
            tcp: Arc::new(NoTcpHealth),
            radio: Arc::new(NoRadioInfo),
            index_source: Arc::new(RandomIndex),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_tcp(mut self, tcp: Arc<dyn TcpHealth>) -> Self {
        self.tcp = tcp;
        self
    }

    pub fn with_radio(mut self, radio: Arc<dyn RadioInfo>) -> Self {
        self.radio = radio;
        self
    }

    pub fn with_index_source(mut self, index_source: Arc<dyn IndexSource>) -> Self {
        self.index_source = index_source;
        self
    }
}

pub(crate) enum Message {
    Connected(LinkConfig, Capabilities),
    CapabilitiesChanged(Capabilities),
    LinkConfigChanged(LinkConfig),
    PrivateDnsSettingsChanged(PrivateDnsConfig),
    ForceReevaluation(u32),
    AcceptPartialConnectivity,
    PortalAppFinished(PortalAppResponse),
    DnsResponse(i32),
    ConfigurationChanged(Box<MonitorConfig>),
    Status(oneshot::Sender<MonitorStatus>),
    Disconnected(oneshot::Sender<()>),
}

/// Handle to one monitored network. Dropping it without calling
/// [`NetworkMonitor::disconnected`] also stops the task.
pub struct NetworkMonitor {
    tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Start the monitor task. Must be called within a tokio runtime.
    pub fn spawn(deps: MonitorDeps, config: MonitorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Monitor::new(deps, config).run(rx));
        Self { tx, task }
    }

    fn send(&self, msg: Message) {
        if self.tx.send(msg).is_err() {
            tracing::warn!("network monitor task is gone; message dropped");
        }
    }

    pub fn connected(&self, link: LinkConfig, capabilities: Capabilities) {
        self.send(Message::Connected(link, capabilities));
    }

    pub fn capabilities_changed(&self, capabilities: Capabilities) {
        self.send(Message::CapabilitiesChanged(capabilities));
    }

    pub fn link_config_changed(&self, link: LinkConfig) {
        self.send(Message::LinkConfigChanged(link));
    }

    pub fn private_dns_settings_changed(&self, config: PrivateDnsConfig) {
        self.send(Message::PrivateDnsSettingsChanged(config));
    }

    pub fn force_reevaluation(&self, requester: u32) {
        self.send(Message::ForceReevaluation(requester));
    }

    pub fn accept_partial_connectivity(&self) {
        self.send(Message::AcceptPartialConnectivity);
    }

    pub fn captive_portal_app_finished(&self, response: PortalAppResponse) {
        self.send(Message::PortalAppFinished(response));
    }

    /// A DNS lookup made on this network finished with `return_code` (0 ok, 255 timeout).
    pub fn dns_response(&self, return_code: i32) {
        self.send(Message::DnsResponse(return_code));
    }

    pub fn configuration_changed(&self, config: MonitorConfig) {
        self.send(Message::ConfigurationChanged(Box::new(config)));
    }

    pub async fn status(&self) -> Result<MonitorStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Message::Status(tx))
            .map_err(|_| anyhow!("network monitor task is gone"))?;
        rx.await.map_err(|_| anyhow!("network monitor stopped before answering"))
    }

    /// Cancel everything and wait until the task has drained its workers.
    pub async fn disconnected(self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Disconnected(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = self.task.await {
            tracing::error!("network monitor task failed: {}", e);
        }
    }
}
