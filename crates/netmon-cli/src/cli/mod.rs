//! CLI for the NetMon network validator.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use netmon_core::config;

use commands::{
    run_check, run_completions, run_config, run_man, run_portal_api, run_probe, CheckOptions,
};

/// Top-level CLI for NetMon.
#[derive(Debug, Parser)]
#[command(name = "netmon")]
#[command(about = "NetMon: network validation, captive portal and data stall detection", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Validate the current network and print the verdict.
    Check {
        /// Treat the network as Wi-Fi (default: ethernet).
        #[arg(long)]
        wifi: bool,
        /// Treat the network as metered (skips the bandwidth check).
        #[arg(long)]
        metered: bool,
        /// Captive portal API endpoint advertised by the network (https only).
        #[arg(long, value_name = "URL")]
        portal_api: Option<String>,
        /// Validate strict-mode private DNS against this hostname.
        #[arg(long, value_name = "HOST")]
        private_dns: Option<String>,
        /// Give up after this many seconds.
        #[arg(long, default_value = "30", value_name = "SECS")]
        timeout: u64,
    },

    /// Run a single probe against a URL and print its classification.
    Probe {
        /// Probe URL, e.g. http://connectivitycheck.gstatic.com/generate_204.
        url: String,
        /// Report the probe as the HTTPS prober.
        #[arg(long)]
        https: bool,
    },

    /// Fetch and print a captive portal API document.
    PortalApi {
        /// API endpoint (https only).
        url: String,
    },

    /// Print the config path and the effective configuration.
    Config,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the man page (roff).
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Check {
                wifi,
                metered,
                portal_api,
                private_dns,
                timeout,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let opts = CheckOptions {
                    wifi,
                    metered,
                    portal_api,
                    private_dns,
                    timeout_secs: timeout,
                };
                run_check(cfg, opts).await?;
            }
            CliCommand::Probe { url, https } => {
                let cfg = config::load_or_init()?;
                run_probe(cfg, &url, https).await?;
            }
            CliCommand::PortalApi { url } => {
                let cfg = config::load_or_init()?;
                run_portal_api(cfg, &url).await?;
            }
            CliCommand::Config => run_config()?,
            CliCommand::Completions { shell } => run_completions(shell),
            CliCommand::Man => run_man()?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
