//! `netmon probe` – run one prober and print what it saw.

use anyhow::{Context, Result};
use url::Url;

use netmon_core::config::MonitorConfig;
use netmon_core::probe::{self, ProbeOutcome, ProbeSpec, ProbeType};

use super::system_context;

pub async fn run_probe(cfg: MonitorConfig, url: &str, https: bool) -> Result<()> {
    let url = Url::parse(url.trim()).with_context(|| format!("invalid probe URL `{}`", url))?;
    let probe_type = if https || url.scheme() == "https" {
        ProbeType::Https
    } else {
        ProbeType::Http
    };
    let ctx = system_context(cfg);
    let run = probe::run_probe(&ctx, &ProbeSpec::new(probe_type, url), None).await;

    let outcome = match run.result.outcome {
        ProbeOutcome::Success => "success",
        ProbeOutcome::Portal => "portal",
        ProbeOutcome::Failure => "failure",
    };
    println!("Probe:   {:?} {}", run.result.probe_type, run.result.url);
    println!("Outcome: {}", outcome);
    println!(
        "Status:  {}",
        run.result
            .http_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("DNS:     {}", if run.result.dns_resolved { "ok" } else { "failed" });
    if let Some(redirect) = &run.result.redirect_url {
        println!("Portal:  {}", redirect);
    }
    Ok(())
}
