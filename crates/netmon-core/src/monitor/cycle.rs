//! Cycle lifecycle: starting probes, folding their results, and the stages
//! that follow a verdict (private DNS gate, bandwidth check, re-check timers).

use std::sync::Arc;
use url::Url;

use super::actor::{Monitor, WorkerDone};
use super::{BandwidthStatus, ValidationState};
use crate::config::PortalMode;
use crate::evaluation::{
    result_to_string, ValidationVerdict, NETWORK_VALIDATION_PROBE_DNS,
    NETWORK_VALIDATION_PROBE_PRIVDNS, NETWORK_VALIDATION_RESULT_INVALID,
    NETWORK_VALIDATION_RESULT_PARTIAL, NETWORK_VALIDATION_RESULT_SKIPPED,
    NETWORK_VALIDATION_RESULT_VALID,
};
use crate::orchestrator::{build_plan, run_cycle, CycleEvent, CycleVerdict};
use crate::private_dns::{self, PrivateDnsMode, PrivateDnsReport};
use crate::probe::portal_api::now_millis;
use crate::probe::{run_bandwidth_probe, ProbeContext};

impl Monitor {
    fn probe_context(&self, abort: crate::control::AbortToken) -> ProbeContext {
        ProbeContext {
            transport: Arc::clone(&self.deps.transport),
            resolver: Arc::clone(&self.deps.resolver),
            config: Arc::clone(&self.config),
            rules: Arc::clone(&self.rules),
            abort,
        }
    }

    /// Supersede whatever is running and start a fresh cycle.
    pub(super) fn start_cycle(&mut self, reason: &str) {
        if !self.connected {
            return;
        }
        self.reevaluate_at = None;
        self.reevaluate_delay = None;
        self.tcp_poll_at = None;
        self.dns_stage.cancel();
        self.dns_gate_pending = false;
        let (generation, abort) = self.cycles.begin();
        self.eval.clear_probe_results();

        if !self
            .capabilities
            .requires_validation(self.config.validate_tethering_networks)
        {
            tracing::info!(reason, "validation not required; skipping probes");
            self.cycles.finish(generation);
            self.enter_validated(
                NETWORK_VALIDATION_RESULT_VALID | NETWORK_VALIDATION_RESULT_SKIPPED,
                ValidationVerdict::Skipped,
            );
            return;
        }
        if self.config.portal_mode == PortalMode::Ignore {
            tracing::info!(reason, "portal mode is ignore; reporting valid without probing");
            self.cycles.finish(generation);
            self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
            return;
        }

        self.stall.mark_probe(std::time::Instant::now());
        let first_attempt = self.cycles_started == 0;
        self.cycles_started += 1;
        let plan = build_plan(
            &self.config,
            &self.link,
            now_millis(),
            first_attempt,
            self.deps.index_source.next_index(),
        );
        tracing::info!(
            reason,
            generation,
            http = plan.http.len(),
            https = plan.https.len(),
            portal_api = plan.portal_api.is_some(),
            "starting validation cycle"
        );
        self.state = ValidationState::Evaluating;

        let ctx = self.probe_context(abort);
        let tx = self.events_tx.clone();
        self.workers.spawn(async move {
            let worker = tokio::spawn(async move {
                let report = move |event: CycleEvent| {
                    let _ = tx.send((generation, event));
                };
                run_cycle(ctx, plan, &report).await
            });
            let verdict = worker.await.unwrap_or_else(|e| {
                tracing::warn!(generation, "validation cycle worker died: {}", e);
                CycleVerdict::Invalid
            });
            WorkerDone::Cycle { generation, verdict }
        });
    }

    pub(super) fn notify_probe_status(&self) {
        self.deps
            .observer
            .probe_status_changed(self.eval.probes_attempted(), self.eval.probes_succeeded());
    }

    pub(super) fn on_cycle_event(&mut self, generation: u64, event: CycleEvent) {
        if !self.cycles.is_current(generation) {
            tracing::trace!(generation, "dropping event from superseded cycle");
            return;
        }
        match event {
            CycleEvent::Dns(obs) => self.stall.record_dns(obs.return_code, obs.at),
            CycleEvent::ProbeCompleted(result) => {
                let mut changed = self
                    .eval
                    .report_probe_result(NETWORK_VALIDATION_PROBE_DNS, result.dns_resolved);
                if let Some(bit) = result.probe_type.probe_bit() {
                    changed |= self.eval.report_probe_result(bit, result.is_success());
                }
                if changed {
                    self.notify_probe_status();
                }
            }
            CycleEvent::PortalData(data) => self.deps.observer.portal_data_changed(&data),
        }
    }

    pub(super) fn on_cycle_done(&mut self, generation: u64, verdict: CycleVerdict) {
        if !self.cycles.is_current(generation) {
            tracing::debug!(generation, ?verdict, "dropping verdict from superseded cycle");
            return;
        }
        self.cycles.finish(generation);
        tracing::info!(generation, ?verdict, "validation cycle finished");

        if self.wanted_as_is {
            self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
            return;
        }
        match verdict {
            CycleVerdict::Valid => {
                if self.private_dns.is_strict() {
                    self.start_private_dns_stage(true);
                } else {
                    self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
                    if self.private_dns.mode == PrivateDnsMode::Opportunistic {
                        self.start_private_dns_stage(false);
                    }
                }
            }
            CycleVerdict::Partial if self.partial_accepted => self.enter_validated(
                NETWORK_VALIDATION_RESULT_VALID | NETWORK_VALIDATION_RESULT_PARTIAL,
                ValidationVerdict::Partial,
            ),
            CycleVerdict::Partial => {
                self.enter_failed(NETWORK_VALIDATION_RESULT_PARTIAL, ValidationVerdict::Partial)
            }
            CycleVerdict::Portal { redirect_url } => match self.config.portal_mode {
                PortalMode::Prompt => self.enter_portal(redirect_url),
                PortalMode::Avoid | PortalMode::Ignore => {
                    tracing::info!(url = %redirect_url, "avoiding captive portal network");
                    self.enter_failed(NETWORK_VALIDATION_RESULT_INVALID, ValidationVerdict::Invalid)
                }
            },
            CycleVerdict::Invalid => {
                self.enter_failed(NETWORK_VALIDATION_RESULT_INVALID, ValidationVerdict::Invalid)
            }
        }
    }

    fn report_result(&mut self, result: u32, redirect_url: Option<String>, verdict: ValidationVerdict) {
        let tested = self.eval.report_evaluation_result(result, redirect_url, verdict);
        tracing::info!(
            result = %result_to_string(tested.result, tested.redirect_url.as_deref()),
            probes_succeeded = tested.probes_succeeded,
            "network tested"
        );
        self.deps.observer.network_tested(
            tested.result,
            tested.probes_succeeded,
            tested.redirect_url.as_deref(),
        );
    }

    fn hide_prompt(&mut self) {
        if self.prompt_shown {
            self.prompt_shown = false;
            self.deps.observer.hide_login_prompt();
        }
    }

    pub(super) fn enter_validated(&mut self, result: u32, verdict: ValidationVerdict) {
        self.report_result(result, None, verdict);
        self.state = ValidationState::Validated;
        self.last_failed = false;
        self.backoff.reset();
        self.reevaluate_at = None;
        self.reevaluate_delay = None;
        self.hide_prompt();
        if result & NETWORK_VALIDATION_RESULT_SKIPPED == 0 {
            self.schedule_tcp_poll();
            self.maybe_start_bandwidth();
        }
    }

    fn enter_failed(&mut self, result: u32, verdict: ValidationVerdict) {
        self.report_result(result, None, verdict);
        self.state = ValidationState::Evaluating;
        self.last_failed = true;
        self.hide_prompt();
        if !self.auto_reevaluate {
            return;
        }
        // A suspended network keeps its current delay instead of growing it.
        let delay = self.backoff.next_delay(!self.capabilities.is_suspended());
        tracing::debug!(delay_ms = delay.as_millis() as u64, failures = self.backoff.failures(), "re-evaluation scheduled");
        self.reevaluate_delay = Some(delay);
        self.reevaluate_at = Some(tokio::time::Instant::now() + delay);
    }

    fn enter_portal(&mut self, redirect_url: String) {
        self.report_result(
            NETWORK_VALIDATION_RESULT_INVALID,
            Some(redirect_url.clone()),
            ValidationVerdict::Portal { redirect_url },
        );
        self.state = ValidationState::CaptivePortalDetected;
        self.last_failed = true;
        if !self.prompt_shown {
            self.prompt_shown = true;
            self.deps.observer.show_login_prompt();
        }
        if self.auto_reevaluate {
            let delay = self.config.portal_reevaluate_delay();
            self.reevaluate_delay = Some(delay);
            self.reevaluate_at = Some(tokio::time::Instant::now() + delay);
        }
    }

    /// Validate private DNS. With `gate` the VALID report waits for a strict-mode pass;
    /// without it the check runs in the background of an already validated network.
    pub(super) fn start_private_dns_stage(&mut self, gate: bool) {
        let (generation, _abort) = self.dns_stage.begin();
        self.dns_gate_pending = gate;
        if gate {
            self.state = ValidationState::Evaluating;
            self.tcp_poll_at = None;
        }
        let resolver = Arc::clone(&self.deps.resolver);
        let config = self.private_dns.clone();
        let timeout = self.config.private_dns_probe_timeout();
        let suffix = self.config.private_dns_probe_suffix.clone();
        let concurrent = self.config.async_private_dns;
        tracing::debug!(generation, mode = ?config.mode, hostname = ?config.hostname, "private DNS validation started");
        self.workers.spawn(async move {
            // The inner task is the join boundary: a panicking resolver fails the pass.
            let failed = PrivateDnsReport::failed(&config);
            let worker = tokio::spawn(async move {
                private_dns::validate(resolver.as_ref(), &config, timeout, &suffix, concurrent).await
            });
            let report = worker.await.unwrap_or_else(|e| {
                tracing::warn!(generation, "private DNS worker died: {}", e);
                failed
            });
            WorkerDone::PrivateDns { generation, report }
        });
    }

    pub(super) fn on_private_dns_done(&mut self, generation: u64, report: PrivateDnsReport) {
        if !self.dns_stage.is_current(generation)
            || report.mode != self.private_dns.mode
            || report.hostname != self.private_dns.hostname
        {
            tracing::debug!(generation, hostname = ?report.hostname, "dropping stale private DNS result");
            return;
        }
        self.dns_stage.finish(generation);
        let gate = std::mem::replace(&mut self.dns_gate_pending, false);

        match report.mode {
            PrivateDnsMode::Strict => {
                if report.resolved {
                    if let Some(hostname) = report.hostname.as_deref() {
                        self.private_dns.resolved_addresses = report.addresses.clone();
                        self.deps.observer.private_dns_resolved(
                            hostname,
                            &report.addresses,
                            PrivateDnsMode::Strict,
                        );
                    }
                }
                if self
                    .eval
                    .report_probe_result(NETWORK_VALIDATION_PROBE_PRIVDNS, report.passed())
                {
                    self.notify_probe_status();
                }
                if report.passed() {
                    if gate || self.state != ValidationState::Validated {
                        self.enter_validated(NETWORK_VALIDATION_RESULT_VALID, ValidationVerdict::Valid);
                    }
                } else {
                    tracing::info!(hostname = ?report.hostname, "strict private DNS validation failed");
                    self.enter_failed(NETWORK_VALIDATION_RESULT_INVALID, ValidationVerdict::Invalid);
                }
            }
            PrivateDnsMode::Opportunistic => {
                if report.live
                    && self
                        .eval
                        .report_probe_result(NETWORK_VALIDATION_PROBE_PRIVDNS, true)
                {
                    self.notify_probe_status();
                }
            }
            PrivateDnsMode::Off => {}
        }
    }

    pub(super) fn maybe_start_bandwidth(&mut self) {
        if !matches!(self.bandwidth, BandwidthStatus::NotRun | BandwidthStatus::Failed)
            || self.bandwidth_ctl.is_active()
            || !self.capabilities.not_metered
        {
            return;
        }
        let Some(raw) = self.config.bandwidth_url.clone() else {
            self.bandwidth = BandwidthStatus::Skipped;
            return;
        };
        let url = match Url::parse(raw.trim()) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("invalid bandwidth URL `{}`: {}", raw, e);
                self.bandwidth = BandwidthStatus::Skipped;
                return;
            }
        };
        let (generation, abort) = self.bandwidth_ctl.begin();
        self.bandwidth = BandwidthStatus::Running;
        let ctx = self.probe_context(abort);
        self.workers.spawn(async move {
            let worker = tokio::spawn(async move { run_bandwidth_probe(&ctx, &url).await });
            let passed = worker.await.unwrap_or_else(|e| {
                tracing::warn!(generation, "bandwidth worker died: {}", e);
                false
            });
            WorkerDone::Bandwidth { generation, passed }
        });
    }

    pub(super) fn on_bandwidth_done(&mut self, generation: u64, passed: bool) {
        if !self.bandwidth_ctl.is_current(generation) {
            return;
        }
        self.bandwidth_ctl.finish(generation);
        if passed {
            tracing::info!("bandwidth check passed");
            self.bandwidth = BandwidthStatus::Passed;
            self.bandwidth_backoff.reset();
        } else {
            self.bandwidth = BandwidthStatus::Failed;
            let delay = self.bandwidth_backoff.next_delay(true);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "bandwidth check failed; retry scheduled");
            self.bandwidth_retry_at = Some(tokio::time::Instant::now() + delay);
        }
    }
}
