//! CLI command handlers, one per file.

mod check;
mod config;
mod docs;
mod portal_api;
mod probe;

pub use check::{run_check, CheckOptions};
pub use config::run_config;
pub use docs::{run_completions, run_man};
pub use portal_api::run_portal_api;
pub use probe::run_probe;

use netmon_core::config::MonitorConfig;
use netmon_core::control::AbortToken;
use netmon_core::probe::classify::ContentRules;
use netmon_core::probe::{CurlTransport, ProbeContext, SystemResolver};
use std::sync::Arc;

/// Probe context over libcurl and the system resolver.
pub(crate) fn system_context(cfg: MonitorConfig) -> ProbeContext {
    ProbeContext {
        transport: Arc::new(CurlTransport),
        resolver: Arc::new(SystemResolver),
        rules: Arc::new(ContentRules::from_config(&cfg)),
        config: Arc::new(cfg),
        abort: AbortToken::new(),
    }
}
