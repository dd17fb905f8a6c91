//! `netmon check` – validate the current network once and print the verdict.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use netmon_core::config::MonitorConfig;
use netmon_core::evaluation::{probe_bits_to_string, result_to_string};
use netmon_core::monitor::{MonitorDeps, NetworkMonitor};
use netmon_core::network::{Capabilities, LinkConfig, Transport};
use netmon_core::observer::{ChannelObserver, MonitorEvent};
use netmon_core::private_dns::PrivateDnsConfig;

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub wifi: bool,
    pub metered: bool,
    pub portal_api: Option<String>,
    pub private_dns: Option<String>,
    pub timeout_secs: u64,
}

impl CheckOptions {
    fn capabilities(&self) -> Capabilities {
        let transport = if self.wifi {
            Transport::Wifi
        } else {
            Transport::Ethernet
        };
        Capabilities {
            transports: vec![transport],
            internet: true,
            trusted: true,
            not_restricted: true,
            not_suspended: true,
            not_metered: !self.metered,
            ..Capabilities::default()
        }
    }

    fn link(&self) -> LinkConfig {
        LinkConfig {
            interface_name: None,
            portal_api_url: self.portal_api.clone(),
        }
    }
}

pub async fn run_check(cfg: MonitorConfig, opts: CheckOptions) -> Result<()> {
    let (observer, mut events) = ChannelObserver::new();
    let monitor = NetworkMonitor::spawn(MonitorDeps::new(Arc::new(observer)), cfg);
    if let Some(host) = &opts.private_dns {
        monitor.private_dns_settings_changed(PrivateDnsConfig::strict(host.clone()));
    }
    monitor.connected(opts.link(), opts.capabilities());

    let waited = tokio::time::timeout(Duration::from_secs(opts.timeout_secs), async {
        while let Some(event) = events.recv().await {
            if print_event(&event) {
                return true;
            }
        }
        false
    })
    .await;

    let status = monitor.status().await?;
    monitor.disconnected().await;

    match waited {
        Ok(true) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Ok(false) => bail!("monitor stopped before reporting a result"),
        Err(_) => bail!("no verdict within {}s", opts.timeout_secs),
    }
}

/// Print one notification; true once the verdict is in.
fn print_event(event: &MonitorEvent) -> bool {
    match event {
        MonitorEvent::NetworkTested {
            result,
            probes_succeeded,
            redirect_url,
        } => {
            println!(
                "Result:    {}",
                result_to_string(*result, redirect_url.as_deref())
            );
            println!("Succeeded: {}", probe_bits_to_string(*probes_succeeded));
            if let Some(url) = redirect_url {
                println!("Login at:  {}", url);
            }
            true
        }
        MonitorEvent::ProbeStatusChanged {
            probes_completed,
            probes_succeeded,
        } => {
            tracing::debug!(
                completed = %probe_bits_to_string(*probes_completed),
                succeeded = %probe_bits_to_string(*probes_succeeded),
                "probe status"
            );
            false
        }
        MonitorEvent::PortalDataChanged(data) => {
            println!(
                "Portal API: captive={} login={}",
                data.captive,
                data.user_portal_url.as_deref().unwrap_or("-")
            );
            false
        }
        MonitorEvent::PrivateDnsResolved {
            hostname,
            addresses,
            ..
        } => {
            let addrs: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
            println!("Private DNS: {} -> {}", hostname, addrs.join(", "));
            false
        }
        _ => false,
    }
}
