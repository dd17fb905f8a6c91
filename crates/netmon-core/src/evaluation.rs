//! Accumulated probe and result bitmasks for the current validation cycle.

/// Network has working internet access.
pub const NETWORK_VALIDATION_RESULT_VALID: u32 = 0x01;
/// Only one of HTTP/HTTPS worked (or the user accepted such a network).
pub const NETWORK_VALIDATION_RESULT_PARTIAL: u32 = 0x02;
/// Validation was not performed (capabilities gate).
pub const NETWORK_VALIDATION_RESULT_SKIPPED: u32 = 0x04;
/// No bit set: INVALID, or PORTAL when reported with a redirect URL.
pub const NETWORK_VALIDATION_RESULT_INVALID: u32 = 0x00;

pub const NETWORK_VALIDATION_PROBE_DNS: u32 = 0x04;
pub const NETWORK_VALIDATION_PROBE_HTTP: u32 = 0x08;
pub const NETWORK_VALIDATION_PROBE_HTTPS: u32 = 0x10;
pub const NETWORK_VALIDATION_PROBE_FALLBACK: u32 = 0x20;
pub const NETWORK_VALIDATION_PROBE_PRIVDNS: u32 = 0x40;

/// What a finished cycle (probes plus private DNS stage) decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Valid,
    Partial,
    Portal { redirect_url: String },
    Invalid,
    Skipped,
}

/// Payload for one `networkTested` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestedReport {
    pub result: u32,
    pub probes_succeeded: u32,
    pub redirect_url: Option<String>,
}

/// Probe bits and last reported result. Owned by the monitor task.
#[derive(Debug, Clone, Default)]
pub struct EvaluationState {
    probes_attempted: u32,
    probes_succeeded: u32,
    evaluation_result: u32,
    redirect_url: Option<String>,
    probe_completed_result: Option<ValidationVerdict>,
}

impl EvaluationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset probe bits at the start of a cycle. The last reported result stays.
    pub fn clear_probe_results(&mut self) {
        self.probes_attempted = 0;
        self.probes_succeeded = 0;
        self.probe_completed_result = None;
    }

    /// Record one probe outcome. Returns `true` when (attempted, succeeded) changed.
    ///
    /// A failure only marks the bit attempted: bits never go down within a cycle.
    pub fn report_probe_result(&mut self, probe_bit: u32, succeeded: bool) -> bool {
        let before = (self.probes_attempted, self.probes_succeeded);
        self.probes_attempted |= probe_bit;
        if succeeded {
            self.probes_succeeded |= probe_bit;
        }
        before != (self.probes_attempted, self.probes_succeeded)
    }

    /// Drop a success bit; used when a stage that previously passed is re-run.
    pub fn clear_probe_bit(&mut self, probe_bit: u32) -> bool {
        let before = (self.probes_attempted, self.probes_succeeded);
        self.probes_attempted &= !probe_bit;
        self.probes_succeeded &= !probe_bit;
        before != (self.probes_attempted, self.probes_succeeded)
    }

    /// Store the final result of a cycle and build the `networkTested` payload.
    pub fn report_evaluation_result(
        &mut self,
        result: u32,
        redirect_url: Option<String>,
        verdict: ValidationVerdict,
    ) -> TestedReport {
        self.evaluation_result = result;
        self.redirect_url = redirect_url.clone();
        self.probe_completed_result = Some(verdict);
        TestedReport {
            result,
            probes_succeeded: self.probes_succeeded,
            redirect_url,
        }
    }

    pub fn probes_attempted(&self) -> u32 {
        self.probes_attempted
    }

    pub fn probes_succeeded(&self) -> u32 {
        self.probes_succeeded
    }

    pub fn evaluation_result(&self) -> u32 {
        self.evaluation_result
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn probe_completed_result(&self) -> Option<&ValidationVerdict> {
        self.probe_completed_result.as_ref()
    }
}

/// Render a probe bitmask for logs and the CLI, e.g. `DNS|HTTP|HTTPS`.
pub fn probe_bits_to_string(bits: u32) -> String {
    const NAMES: [(u32, &str); 5] = [
        (NETWORK_VALIDATION_PROBE_DNS, "DNS"),
        (NETWORK_VALIDATION_PROBE_HTTP, "HTTP"),
        (NETWORK_VALIDATION_PROBE_HTTPS, "HTTPS"),
        (NETWORK_VALIDATION_PROBE_FALLBACK, "FALLBACK"),
        (NETWORK_VALIDATION_PROBE_PRIVDNS, "PRIVDNS"),
    ];
    let parts: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join("|")
    }
}

/// Render a result bitmask; `redirect` distinguishes PORTAL from INVALID.
pub fn result_to_string(result: u32, redirect: Option<&str>) -> String {
    let mut parts = Vec::new();
    if result & NETWORK_VALIDATION_RESULT_VALID != 0 {
        parts.push("VALID");
    }
    if result & NETWORK_VALIDATION_RESULT_PARTIAL != 0 {
        parts.push("PARTIAL");
    }
    if result & NETWORK_VALIDATION_RESULT_SKIPPED != 0 {
        parts.push("SKIPPED");
    }
    if parts.is_empty() {
        return if redirect.is_some() { "PORTAL" } else { "INVALID" }.to_string();
    }
    parts.join("|")
}
