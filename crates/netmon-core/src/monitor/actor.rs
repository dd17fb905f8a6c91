use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use super::{BandwidthStatus, Message, MonitorDeps, MonitorStatus, PortalAppResponse, ValidationState};
use crate::config::MonitorConfig;
use crate::control::CycleControl;
use crate::evaluation::{
    EvaluationState, ValidationVerdict, NETWORK_VALIDATION_PROBE_PRIVDNS,
    NETWORK_VALIDATION_RESULT_PARTIAL, NETWORK_VALIDATION_RESULT_VALID,
};
use crate::network::{Capabilities, LinkConfig};
use crate::orchestrator::{CycleEvent, CycleVerdict};
use crate::private_dns::{PrivateDnsConfig, PrivateDnsMode, PrivateDnsReport};
use crate::probe::classify::ContentRules;
use crate::reevaluate::{Backoff, ReevaluationPolicy};
use crate::stall::{build_snapshot, SnapshotInputs, StallEvaluator, StallSettings};

/// Results of work spawned by the monitor, tagged with the generation it ran under.
pub(super) enum WorkerDone {
    Cycle { generation: u64, verdict: CycleVerdict },
    PrivateDns { generation: u64, report: PrivateDnsReport },
    Bandwidth { generation: u64, passed: bool },
}

pub(super) struct Monitor {
    pub(super) deps: MonitorDeps,
    pub(super) config: Arc<MonitorConfig>,
    pub(super) rules: Arc<ContentRules>,
    pub(super) state: ValidationState,
    pub(super) connected: bool,
    pub(super) capabilities: Capabilities,
    pub(super) link: LinkConfig,
    pub(super) private_dns: PrivateDnsConfig,
    pub(super) eval: EvaluationState,
    pub(super) cycles: CycleControl,
    pub(super) dns_stage: CycleControl,
    /// True while a strict-mode private DNS stage holds back a VALID verdict.
    pub(super) dns_gate_pending: bool,
    pub(super) bandwidth_ctl: CycleControl,
    pub(super) bandwidth: BandwidthStatus,
    pub(super) backoff: Backoff,
    pub(super) bandwidth_backoff: Backoff,
    pub(super) stall: StallEvaluator,
    pub(super) cycles_started: u32,
    pub(super) partial_accepted: bool,
    pub(super) wanted_as_is: bool,
    pub(super) auto_reevaluate: bool,
    pub(super) prompt_shown: bool,
    /// The last completed cycle did not validate.
    pub(super) last_failed: bool,
    pub(super) reevaluate_at: Option<tokio::time::Instant>,
    pub(super) reevaluate_delay: Option<Duration>,
    pub(super) tcp_poll_at: Option<tokio::time::Instant>,
    pub(super) bandwidth_retry_at: Option<tokio::time::Instant>,
    pub(super) workers: JoinSet<WorkerDone>,
    pub(super) events_tx: mpsc::UnboundedSender<(u64, CycleEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, CycleEvent)>,
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Monitor {
    pub(super) fn new(deps: MonitorDeps, config: MonitorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let policy = ReevaluationPolicy::from_config(&config);
        Self {
            deps,
            rules: Arc::new(ContentRules::from_config(&config)),
            stall: StallEvaluator::new(StallSettings::from_config(&config)),
            config: Arc::new(config),
            state: ValidationState::Default,
            connected: false,
            capabilities: Capabilities::default(),
            link: LinkConfig::default(),
            private_dns: PrivateDnsConfig::off(),
            eval: EvaluationState::new(),
            cycles: CycleControl::new(),
            dns_stage: CycleControl::new(),
            dns_gate_pending: false,
            bandwidth_ctl: CycleControl::new(),
            bandwidth: BandwidthStatus::NotRun,
            backoff: Backoff::new(policy),
            bandwidth_backoff: Backoff::new(policy),
            cycles_started: 0,
            partial_accepted: false,
            wanted_as_is: false,
            auto_reevaluate: true,
            prompt_shown: false,
            last_failed: false,
            reevaluate_at: None,
            reevaluate_delay: None,
            tcp_poll_at: None,
            bandwidth_retry_at: None,
            workers: JoinSet::new(),
            events_tx,
            events_rx,
        }
    }

    pub(super) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Message>) {
        loop {
            tokio::select! {
                msg = inbox.recv() => match msg {
                    Some(Message::Disconnected(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(msg) => self.handle(msg),
                    None => {
                        tracing::debug!("monitor handle dropped");
                        self.shutdown().await;
                        return;
                    }
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_cycle_event(generation, event);
                }
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.on_worker(joined);
                }
                _ = sleep_until(self.reevaluate_at) => {
                    self.reevaluate_at = None;
                    self.reevaluate_delay = None;
                    self.start_cycle("scheduled re-evaluation");
                }
                _ = sleep_until(self.tcp_poll_at) => {
                    self.tcp_poll_at = None;
                    self.on_tcp_poll();
                }
                _ = sleep_until(self.bandwidth_retry_at) => {
                    self.bandwidth_retry_at = None;
                    if self.state == ValidationState::Validated {
                        self.maybe_start_bandwidth();
                    }
                }
            }
        }
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Connected(link, caps) => self.on_connected(link, caps),
            Message::CapabilitiesChanged(caps) => self.on_capabilities_changed(caps),
            Message::LinkConfigChanged(link) => self.on_link_config_changed(link),
            Message::PrivateDnsSettingsChanged(cfg) => self.on_private_dns_settings_changed(cfg),
            Message::ForceReevaluation(requester) => {
                tracing::info!(requester, "forced re-evaluation");
                if self.connected {
                    self.backoff.reset();
                    self.start_cycle("forced");
                }
            }
            Message::AcceptPartialConnectivity => self.on_accept_partial(),
            Message::PortalAppFinished(response) => self.on_portal_app_finished(response),
            Message::DnsResponse(code) => {
                self.stall.record_dns(code, Instant::now());
                if self.state == ValidationState::Validated {
                    self.evaluate_stall();
                }
            }
            Message::ConfigurationChanged(cfg) => self.on_configuration_changed(*cfg),
            Message::Status(reply) => {
                let _ = reply.send(self.status());
            }
            // Handled by the run loop.
            Message::Disconnected(_) => {}
        }
    }

    fn on_connected(&mut self, link: LinkConfig, caps: Capabilities) {
        if self.connected {
            tracing::warn!("duplicate connected notification ignored");
            return;
        }
        tracing::info!(interface = ?link.interface_name, "network connected");
        self.connected = true;
        self.link = link;
        self.deps.tcp.set_capabilities(&caps);
        self.capabilities = caps;
        self.start_cycle("connected");
    }

    fn on_capabilities_changed(&mut self, caps: Capabilities) {
        let was_suspended = self.capabilities.is_suspended();
        self.deps.tcp.set_capabilities(&caps);
        self.capabilities = caps;
        if !self.connected {
            return;
        }
        let resumed = was_suspended && !self.capabilities.is_suspended();
        if resumed
            && self.config.reevaluate_when_resume
            && self.last_failed
            && self.state != ValidationState::Validated
        {
            tracing::info!("network resumed after a failed check; re-evaluating now");
            self.backoff.reset();
            self.start_cycle("resumed");
        }
    }

    fn on_link_config_changed(&mut self, link: LinkConfig) {
        let old = mem::replace(&mut self.link, link);
        if !self.connected {
            return;
        }
        let api_url = self.link.portal_api_url.as_deref();
        if api_url.is_some() && api_url != old.portal_api_url.as_deref() {
            tracing::info!(url = ?api_url, "portal API endpoint changed; re-evaluating");
            self.backoff.reset();
            self.start_cycle("portal API endpoint changed");
        }
    }

    fn on_private_dns_settings_changed(&mut self, cfg: PrivateDnsConfig) {
        self.deps
            .tcp
            .set_opportunistic_mode(cfg.mode == PrivateDnsMode::Opportunistic);
        let old = mem::replace(&mut self.private_dns, cfg);
        if old.same_target(&self.private_dns) {
            return;
        }
        tracing::info!(mode = ?self.private_dns.mode, hostname = ?self.private_dns.hostname, "private DNS settings changed");
        // Answers for the old hostname must never be reported.
        let stage_pending = self.dns_gate_pending;
        self.dns_stage.cancel();
        self.dns_gate_pending = false;
        if self.eval.clear_probe_bit(NETWORK_VALIDATION_PROBE_PRIVDNS) {
            self.notify_probe_status();
        }
        if !self.connected || self.cycles.is_active() {
            // A running cycle consults the new settings when it finishes.
            return;
        }
        if stage_pending || self.state == ValidationState::Validated {
            match self.private_dns.mode {
                PrivateDnsMode::Strict if self.private_dns.is_strict() => {
                    self.start_private_dns_stage(true)
                }
                _ if stage_pending => {
                    // Probes already passed; only the strict gate was outstanding.
                    self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
                }
                PrivateDnsMode::Opportunistic => self.start_private_dns_stage(false),
                _ => {}
            }
        }
    }

    fn on_accept_partial(&mut self) {
        tracing::info!("partial connectivity accepted");
        self.partial_accepted = true;
        if !self.connected || self.cycles.is_active() || self.dns_gate_pending {
            return;
        }
        if self.eval.probe_completed_result() == Some(&ValidationVerdict::Partial) {
            self.enter_validated(
                NETWORK_VALIDATION_RESULT_VALID | NETWORK_VALIDATION_RESULT_PARTIAL,
                ValidationVerdict::Partial,
            );
        }
    }

    fn on_portal_app_finished(&mut self, response: PortalAppResponse) {
        tracing::info!(?response, "captive portal app finished");
        if !self.connected {
            return;
        }
        match response {
            PortalAppResponse::Dismissed => {
                self.backoff.reset();
                self.start_cycle("portal app dismissed");
            }
            PortalAppResponse::WantedAsIs => {
                self.wanted_as_is = true;
                self.cycles.cancel();
                self.dns_stage.cancel();
                self.dns_gate_pending = false;
                self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
            }
            PortalAppResponse::Unwanted => {
                self.auto_reevaluate = false;
                self.reevaluate_at = None;
                self.reevaluate_delay = None;
            }
        }
    }

    fn on_configuration_changed(&mut self, cfg: MonitorConfig) {
        tracing::info!("configuration replaced");
        self.rules = Arc::new(ContentRules::from_config(&cfg));
        let policy = ReevaluationPolicy::from_config(&cfg);
        self.backoff.set_policy(policy);
        self.bandwidth_backoff.set_policy(policy);
        self.stall.set_settings(StallSettings::from_config(&cfg));
        self.config = Arc::new(cfg);
    }

    pub(super) fn evaluate_stall(&mut self) {
        if self.config.portal_mode == crate::config::PortalMode::Ignore {
            return;
        }
        let now = Instant::now();
        let Some(report) = self
            .stall
            .evaluate(now, &self.capabilities, self.deps.tcp.as_ref())
        else {
            return;
        };
        tracing::info!(
            methods = report.detection_methods,
            dns_timeouts = report.dns_consecutive_timeouts,
            "data stall suspected"
        );
        self.deps.observer.data_stall_suspected(&report);
        let snapshot = build_snapshot(SnapshotInputs {
            report: &report,
            capabilities: &self.capabilities,
            validation_result: self.eval.evaluation_result(),
            radio: self.deps.radio.as_ref(),
            tcp: self.deps.tcp.as_ref(),
            dns: self.stall.dns_detector(),
            dns_threshold: self.stall.settings().dns_threshold,
            now,
        });
        self.deps.observer.data_stall_snapshot(&snapshot);
        self.start_cycle("data stall");
    }

    fn on_tcp_poll(&mut self) {
        if self.state != ValidationState::Validated || !self.stall.tcp_enabled() {
            return;
        }
        if self.deps.tcp.poll_sockets_info() {
            self.evaluate_stall();
        } else {
            tracing::debug!("TCP socket sampling failed");
        }
        if self.state == ValidationState::Validated {
            self.schedule_tcp_poll();
        }
    }

    pub(super) fn schedule_tcp_poll(&mut self) {
        let eligible = self
            .capabilities
            .eligible_for_stall_detection(self.config.validate_tethering_networks);
        if self.stall.tcp_enabled()
            && eligible
            && self.config.portal_mode != crate::config::PortalMode::Ignore
        {
            self.tcp_poll_at = Some(tokio::time::Instant::now() + self.config.tcp_polling_interval());
        }
    }

    fn on_worker(&mut self, joined: Result<WorkerDone, JoinError>) {
        match joined {
            Ok(WorkerDone::Cycle { generation, verdict }) => {
                // Events are sent before the worker returns; apply them first.
                while let Ok((g, event)) = self.events_rx.try_recv() {
                    self.on_cycle_event(g, event);
                }
                self.on_cycle_done(generation, verdict);
            }
            Ok(WorkerDone::PrivateDns { generation, report }) => {
                self.on_private_dns_done(generation, report)
            }
            Ok(WorkerDone::Bandwidth { generation, passed }) => {
                self.on_bandwidth_done(generation, passed)
            }
            Err(e) if e.is_cancelled() => {}
            // Workers catch their own panics.
            Err(e) => tracing::error!("monitor worker failed to join: {}", e),
        }
    }

    fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            probes_attempted: self.eval.probes_attempted(),
            probes_succeeded: self.eval.probes_succeeded(),
            evaluation_result: self.eval.evaluation_result(),
            redirect_url: self.eval.redirect_url().map(str::to_string),
            reevaluate_delay_ms: self.reevaluate_delay.map(|d| d.as_millis() as u64),
            consecutive_failures: self.backoff.failures(),
            cycle_in_flight: self.cycles.is_active(),
            cycles_started: self.cycles_started,
            partial_accepted: self.partial_accepted,
            bandwidth: self.bandwidth,
            private_dns_mode: self.private_dns.mode,
            dns_consecutive_timeouts: self.stall.dns_detector().consecutive_timeouts(),
        }
    }

    async fn shutdown(&mut self) {
        self.cycles.cancel();
        self.dns_stage.cancel();
        self.bandwidth_ctl.cancel();
        self.reevaluate_at = None;
        self.tcp_poll_at = None;
        self.bandwidth_retry_at = None;
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}
        if self.prompt_shown {
            self.prompt_shown = false;
            self.deps.observer.hide_login_prompt();
        }
        self.state = ValidationState::Disconnected;
        tracing::info!("network monitor stopped");
    }
}
