//! Race the probes of one cycle and decide on the first conclusive signal.
//!
//! HTTPS probes and the portal API request start immediately. HTTP probes
//! start once the portal API answered (or right away when there is none), so a
//! conclusive portal API document never costs an HTTP request. The first HTTPS
//! success or portal ends the race. When HTTPS was planned and did not succeed,
//! one fallback probe runs; it can only turn the verdict into a portal.

use tokio::task::JoinSet;

use super::plan::ProbePlan;
use crate::error::PortalApiError;
use crate::probe::fallback::{FallbackChoice, FallbackSpec};
use crate::probe::http::{run_probe, ProbeRun};
use crate::probe::portal_api::{fetch_portal_api, CaptivePortalData};
use crate::probe::{DnsObservation, ProbeContext, ProbeOutcome, ProbeResult, ProbeSpec, ProbeType};

/// How the probing part of a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleVerdict {
    Valid,
    /// Exactly one of HTTP/HTTPS succeeded.
    Partial,
    Portal { redirect_url: String },
    Invalid,
}

/// Intermediate findings, reported while the cycle is still running.
#[derive(Debug, Clone)]
pub enum CycleEvent {
    Dns(DnsObservation),
    ProbeCompleted(ProbeResult),
    PortalData(CaptivePortalData),
}

enum Finished {
    Probe(ProbeRun),
    PortalApi(Result<CaptivePortalData, PortalApiError>),
}

fn spawn_probe(set: &mut JoinSet<Finished>, ctx: &ProbeContext, spec: ProbeSpec) {
    let ctx = ctx.clone();
    set.spawn(async move {
        // The inner task is the join boundary: a panicking prober becomes a failure.
        let worker_ctx = ctx.clone();
        let worker_spec = spec.clone();
        let run = tokio::spawn(async move { run_probe(&worker_ctx, &worker_spec, None).await }).await;
        Finished::Probe(run.unwrap_or_else(|e| {
            tracing::warn!(url = %spec.url, "probe worker died: {}", e);
            ProbeRun {
                result: ProbeResult::failure(&spec, false),
                dns: None,
            }
        }))
    });
}

fn report_run(run: &ProbeRun, suppress_portal: bool, report: &(dyn Fn(CycleEvent) + Send + Sync)) -> ProbeResult {
    if let Some(obs) = run.dns {
        report(CycleEvent::Dns(obs));
    }
    let mut result = run.result.clone();
    if suppress_portal && result.is_portal() {
        tracing::debug!(url = %result.url, "portal API says not captive; portal response ignored");
        result.outcome = ProbeOutcome::Failure;
        result.redirect_url = None;
    }
    report(CycleEvent::ProbeCompleted(result.clone()));
    result
}

async fn run_fallback(
    ctx: &ProbeContext,
    choice: &FallbackChoice,
    suppress_portal: bool,
    report: &(dyn Fn(CycleEvent) + Send + Sync),
) -> CycleVerdict {
    let (url, spec): (_, Option<&FallbackSpec>) = match choice {
        FallbackChoice::Url(url) => (url, None),
        FallbackChoice::Spec(spec) => (&spec.url, Some(spec)),
        FallbackChoice::Skipped(entry) => {
            tracing::info!(entry = %entry, "fallback entry unusable; no fallback probe");
            return CycleVerdict::Invalid;
        }
    };
    let probe = ProbeSpec::new(ProbeType::Fallback, url.clone());
    let run = run_probe(ctx, &probe, spec).await;
    let result = report_run(&run, suppress_portal, report);
    match result.outcome {
        ProbeOutcome::Portal => CycleVerdict::Portal {
            redirect_url: result.redirect_url.unwrap_or(result.url),
        },
        // A fallback success is recorded but never validates.
        ProbeOutcome::Success | ProbeOutcome::Failure => CycleVerdict::Invalid,
    }
}

/// Run one cycle to completion, reporting intermediate events through `report`.
///
/// A portal verdict aborts every probe still in flight.
pub async fn run_cycle(
    ctx: ProbeContext,
    plan: ProbePlan,
    report: &(dyn Fn(CycleEvent) + Send + Sync),
) -> CycleVerdict {
    let mut set: JoinSet<Finished> = JoinSet::new();
    let https_planned = !plan.https.is_empty();
    let mut http_ok = false;
    let mut suppress_portal = false;

    for spec in plan.https.iter().cloned() {
        spawn_probe(&mut set, &ctx, spec);
    }
    let mut pending_http = Some(plan.http.clone());
    if let Some(api_url) = plan.portal_api.clone() {
        let api_ctx = ctx.clone();
        set.spawn(async move { Finished::PortalApi(fetch_portal_api(&api_ctx, &api_url).await) });
    } else if let Some(http) = pending_http.take() {
        for spec in http {
            spawn_probe(&mut set, &ctx, spec);
        }
    }

    let portal = |set: &mut JoinSet<Finished>, redirect_url: String| {
        ctx.abort.abort();
        set.abort_all();
        CycleVerdict::Portal { redirect_url }
    };

    while let Some(joined) = set.join_next().await {
        let finished = match joined {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("cycle worker failed: {}", e);
                continue;
            }
        };
        match finished {
            Finished::PortalApi(Ok(data)) => {
                if data.is_reportable() {
                    report(CycleEvent::PortalData(data.clone()));
                }
                if data.captive {
                    if let Some(url) = data.user_portal_url.clone() {
                        tracing::info!(url = %url, "portal API reports captive portal");
                        return portal(&mut set, url);
                    }
                } else {
                    suppress_portal = true;
                }
                for spec in pending_http.take().unwrap_or_default() {
                    spawn_probe(&mut set, &ctx, spec);
                }
            }
            Finished::PortalApi(Err(e)) => {
                tracing::warn!("portal API unusable, probing heuristically: {}", e);
                for spec in pending_http.take().unwrap_or_default() {
                    spawn_probe(&mut set, &ctx, spec);
                }
            }
            Finished::Probe(run) => {
                let result = report_run(&run, suppress_portal, report);
                match result.outcome {
                    ProbeOutcome::Portal => {
                        let url = result.redirect_url.unwrap_or(result.url);
                        tracing::info!(probe = ?result.probe_type, url = %url, "captive portal detected");
                        return portal(&mut set, url);
                    }
                    ProbeOutcome::Success if result.probe_type == ProbeType::Https => {
                        // HTTPS success is conclusive; a late HTTP portal must not downgrade it.
                        tracing::debug!(url = %result.url, "HTTPS probe succeeded; cycle validated");
                        ctx.abort.abort();
                        set.abort_all();
                        return CycleVerdict::Valid;
                    }
                    ProbeOutcome::Success => http_ok = true,
                    ProbeOutcome::Failure => {}
                }
            }
        }
    }

    if http_ok && !https_planned {
        return CycleVerdict::Valid;
    }
    let fallback = match plan.fallback.as_ref() {
        Some(choice) => run_fallback(&ctx, choice, suppress_portal, report).await,
        None => CycleVerdict::Invalid,
    };
    match fallback {
        CycleVerdict::Portal { .. } => fallback,
        _ if http_ok => CycleVerdict::Partial,
        _ => CycleVerdict::Invalid,
    }
}
