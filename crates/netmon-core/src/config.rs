use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::stall::{DATA_STALL_EVALUATION_TYPE_DNS, DATA_STALL_EVALUATION_TYPE_TCP};

/// How a detected captive portal is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalMode {
    /// Report the portal and ask the user to log in.
    #[default]
    Prompt,
    /// Treat portals as networks without internet; never prompt.
    Avoid,
    /// Do not probe at all; report VALID and disable stall detection.
    Ignore,
}

/// Resolved configuration snapshot handed to the monitor.
///
/// Built by [`ConfigLayers::resolve`]; each key is looked up in the dynamic
/// override layer, then the static resource file, then falls back to
/// [`MonitorConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Default cleartext probe URL.
    pub http_url: String,
    /// Default HTTPS probe URL.
    pub https_url: String,
    /// Configured HTTP URLs; more than one fans out into parallel probes.
    pub http_urls: Vec<String>,
    pub https_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_http_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_https_url: Option<String>,
    /// Operator test override; honoured only for localhost until the expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_http_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_https_url: Option<String>,
    /// Wall-clock expiry of the test override, in Unix epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_url_expiration_millis: Option<u64>,
    /// Fallback URLs tried when HTTP and HTTPS both fail. Invalid entries are skipped at use.
    pub fallback_urls: Vec<String>,
    /// Device fallback specs: `url@@/@@statusRegex@@/@@locationRegex`, joined by `@@,@@`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_probe_specs: Option<String>,
    /// When false only cleartext probes run and an HTTP success validates.
    pub use_https: bool,
    pub user_agent: String,
    /// Connect + read timeout for each HTTP probe.
    pub probe_timeout_ms: u64,
    /// Timeout for the host lookup that precedes each probe.
    pub dns_probe_timeout_ms: u64,
    pub private_dns_probe_timeout_ms: u64,
    /// Suffix for the randomized private DNS liveness query.
    pub private_dns_probe_suffix: String,
    /// Issue A and AAAA concurrently for strict-mode resolution.
    pub async_private_dns: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_content_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_content_regex: Option<String>,
    /// Exclusive bounds for a 200 body to be checked against the success regex.
    pub min_content_length: u64,
    pub max_content_length: u64,
    pub portal_mode: PortalMode,
    /// Bitmask of enabled stall signals: 1 = DNS, 2 = TCP.
    pub data_stall_evaluation_type: u32,
    pub consecutive_dns_timeout_threshold: u32,
    pub valid_dns_time_threshold_ms: u64,
    pub min_stall_evaluate_interval_ms: u64,
    pub tcp_polling_interval_ms: u64,
    pub initial_reevaluate_delay_ms: u64,
    pub max_reevaluate_delay_ms: u64,
    /// Fixed re-check interval while a portal is detected.
    pub portal_reevaluate_delay_ms: u64,
    /// Re-validate immediately when a failed network leaves the suspended state.
    pub reevaluate_when_resume: bool,
    /// Downgrade portal results when the probe host resolved only to private addresses.
    pub private_ip_no_internet: bool,
    pub validate_tethering_networks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_url: Option<String>,
    pub bandwidth_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            http_url: "http://connectivitycheck.gstatic.com/generate_204".to_string(),
            https_url: "https://www.google.com/generate_204".to_string(),
            http_urls: Vec::new(),
            https_urls: Vec::new(),
            provider_http_url: None,
            provider_https_url: None,
            test_http_url: None,
            test_https_url: None,
            test_url_expiration_millis: None,
            fallback_urls: vec![
                "http://www.google.com/gen_204".to_string(),
                "http://play.googleapis.com/generate_204".to_string(),
            ],
            fallback_probe_specs: None,
            use_https: true,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/60.0.3112.32 Safari/537.36"
                .to_string(),
            probe_timeout_ms: 10_000,
            dns_probe_timeout_ms: 5_000,
            private_dns_probe_timeout_ms: 10_000,
            private_dns_probe_suffix: "-dnsotls-ds.metric.gstatic.com".to_string(),
            async_private_dns: true,
            success_content_regex: None,
            failure_content_regex: None,
            min_content_length: 0,
            max_content_length: 4096,
            portal_mode: PortalMode::Prompt,
            data_stall_evaluation_type: DATA_STALL_EVALUATION_TYPE_DNS
                | DATA_STALL_EVALUATION_TYPE_TCP,
            consecutive_dns_timeout_threshold: 5,
            valid_dns_time_threshold_ms: 30 * 60 * 1000,
            min_stall_evaluate_interval_ms: 60_000,
            tcp_polling_interval_ms: 20_000,
            initial_reevaluate_delay_ms: 1_000,
            max_reevaluate_delay_ms: 10 * 60 * 1000,
            portal_reevaluate_delay_ms: 10 * 60 * 1000,
            reevaluate_when_resume: true,
            private_ip_no_internet: false,
            validate_tethering_networks: false,
            bandwidth_url: None,
            bandwidth_timeout_ms: 10_000,
        }
    }
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dns_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_probe_timeout_ms)
    }

    pub fn private_dns_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.private_dns_probe_timeout_ms)
    }

    pub fn tcp_polling_interval(&self) -> Duration {
        Duration::from_millis(self.tcp_polling_interval_ms)
    }

    pub fn portal_reevaluate_delay(&self) -> Duration {
        Duration::from_millis(self.portal_reevaluate_delay_ms)
    }

    pub fn bandwidth_timeout(&self) -> Duration {
        Duration::from_millis(self.bandwidth_timeout_ms)
    }

    pub fn dns_stall_enabled(&self) -> bool {
        self.data_stall_evaluation_type & DATA_STALL_EVALUATION_TYPE_DNS != 0
    }

    pub fn tcp_stall_enabled(&self) -> bool {
        self.data_stall_evaluation_type & DATA_STALL_EVALUATION_TYPE_TCP != 0
    }
}

/// Ordered configuration sources, highest precedence first.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    layers: Vec<(&'static str, toml::Table)>,
}

impl ConfigLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-precedence layer. `None` (missing or unreadable source) is skipped.
    pub fn with_layer(mut self, name: &'static str, table: Option<toml::Table>) -> Self {
        if let Some(table) = table {
            self.layers.push((name, table));
        }
        self
    }

    /// Look `key` up layer by layer; a value that fails `parse` falls through to the next layer.
    fn lookup<T>(
        &self,
        key: &str,
        parse: impl Fn(&str, &toml::Value) -> Result<T, ConfigError>,
    ) -> Option<T> {
        for (source, table) in &self.layers {
            let Some(value) = table.get(key) else {
                continue;
            };
            match parse(key, value) {
                Ok(v) => return Some(v),
                Err(e) => tracing::warn!(source = *source, "ignoring config value: {}", e),
            }
        }
        None
    }

    /// Resolve every known key into a snapshot.
    pub fn resolve(&self) -> MonitorConfig {
        let d = MonitorConfig::default();
        MonitorConfig {
            http_url: self.lookup("http_url", parse_url).unwrap_or(d.http_url),
            https_url: self.lookup("https_url", parse_url).unwrap_or(d.https_url),
            http_urls: self.lookup("http_urls", parse_url_list).unwrap_or(d.http_urls),
            https_urls: self.lookup("https_urls", parse_url_list).unwrap_or(d.https_urls),
            provider_http_url: self.lookup("provider_http_url", parse_url).or(d.provider_http_url),
            provider_https_url: self
                .lookup("provider_https_url", parse_url)
                .or(d.provider_https_url),
            test_http_url: self.lookup("test_http_url", parse_url).or(d.test_http_url),
            test_https_url: self.lookup("test_https_url", parse_url).or(d.test_https_url),
            test_url_expiration_millis: self
                .lookup("test_url_expiration_millis", parse_u64)
                .or(d.test_url_expiration_millis),
            fallback_urls: self
                .lookup("fallback_urls", parse_string_list)
                .unwrap_or(d.fallback_urls),
            fallback_probe_specs: self
                .lookup("fallback_probe_specs", parse_string)
                .or(d.fallback_probe_specs),
            use_https: self.lookup("use_https", parse_bool).unwrap_or(d.use_https),
            user_agent: self.lookup("user_agent", parse_string).unwrap_or(d.user_agent),
            probe_timeout_ms: self
                .lookup("probe_timeout_ms", parse_u64)
                .unwrap_or(d.probe_timeout_ms),
            dns_probe_timeout_ms: self
                .lookup("dns_probe_timeout_ms", parse_u64)
                .unwrap_or(d.dns_probe_timeout_ms),
            private_dns_probe_timeout_ms: self
                .lookup("private_dns_probe_timeout_ms", parse_u64)
                .unwrap_or(d.private_dns_probe_timeout_ms),
            private_dns_probe_suffix: self
                .lookup("private_dns_probe_suffix", parse_string)
                .unwrap_or(d.private_dns_probe_suffix),
            async_private_dns: self
                .lookup("async_private_dns", parse_bool)
                .unwrap_or(d.async_private_dns),
            success_content_regex: self
                .lookup("success_content_regex", parse_regex)
                .or(d.success_content_regex),
            failure_content_regex: self
                .lookup("failure_content_regex", parse_regex)
                .or(d.failure_content_regex),
            min_content_length: self
                .lookup("min_content_length", parse_u64)
                .unwrap_or(d.min_content_length),
            max_content_length: self
                .lookup("max_content_length", parse_u64)
                .unwrap_or(d.max_content_length),
            portal_mode: self
                .lookup("portal_mode", parse_portal_mode)
                .unwrap_or(d.portal_mode),
            data_stall_evaluation_type: self
                .lookup("data_stall_evaluation_type", parse_u32)
                .unwrap_or(d.data_stall_evaluation_type),
            consecutive_dns_timeout_threshold: self
                .lookup("consecutive_dns_timeout_threshold", parse_u32)
                .unwrap_or(d.consecutive_dns_timeout_threshold),
            valid_dns_time_threshold_ms: self
                .lookup("valid_dns_time_threshold_ms", parse_u64)
                .unwrap_or(d.valid_dns_time_threshold_ms),
            min_stall_evaluate_interval_ms: self
                .lookup("min_stall_evaluate_interval_ms", parse_u64)
                .unwrap_or(d.min_stall_evaluate_interval_ms),
            tcp_polling_interval_ms: self
                .lookup("tcp_polling_interval_ms", parse_u64)
                .unwrap_or(d.tcp_polling_interval_ms),
            initial_reevaluate_delay_ms: self
                .lookup("initial_reevaluate_delay_ms", parse_u64)
                .unwrap_or(d.initial_reevaluate_delay_ms),
            max_reevaluate_delay_ms: self
                .lookup("max_reevaluate_delay_ms", parse_u64)
                .unwrap_or(d.max_reevaluate_delay_ms),
            portal_reevaluate_delay_ms: self
                .lookup("portal_reevaluate_delay_ms", parse_u64)
                .unwrap_or(d.portal_reevaluate_delay_ms),
            reevaluate_when_resume: self
                .lookup("reevaluate_when_resume", parse_bool)
                .unwrap_or(d.reevaluate_when_resume),
            private_ip_no_internet: self
                .lookup("private_ip_no_internet", parse_bool)
                .unwrap_or(d.private_ip_no_internet),
            validate_tethering_networks: self
                .lookup("validate_tethering_networks", parse_bool)
                .unwrap_or(d.validate_tethering_networks),
            bandwidth_url: self.lookup("bandwidth_url", parse_url).or(d.bandwidth_url),
            bandwidth_timeout_ms: self
                .lookup("bandwidth_timeout_ms", parse_u64)
                .unwrap_or(d.bandwidth_timeout_ms),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn parse_string(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(key, "a string"))
}

fn parse_bool(key: &str, value: &toml::Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or_else(|| wrong_type(key, "a boolean"))
}

fn parse_u64(key: &str, value: &toml::Value) -> Result<u64, ConfigError> {
    value
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| wrong_type(key, "a non-negative integer"))
}

fn parse_u32(key: &str, value: &toml::Value) -> Result<u32, ConfigError> {
    value
        .as_integer()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| wrong_type(key, "a non-negative 32-bit integer"))
}

fn parse_url(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    let raw = parse_string(key, value)?;
    Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: raw.clone(),
    })?;
    Ok(raw.trim().to_string())
}

/// Array of strings, or one comma-separated string.
fn parse_string_list(key: &str, value: &toml::Value) -> Result<Vec<String>, ConfigError> {
    let items: Vec<String> = match value {
        toml::Value::String(s) => s.split(',').map(str::to_string).collect(),
        toml::Value::Array(arr) => arr
            .iter()
            .map(|v| parse_string(key, v))
            .collect::<Result<_, _>>()?,
        _ => return Err(wrong_type(key, "a list of strings")),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Like [`parse_string_list`] but drops entries that are not valid URLs.
fn parse_url_list(key: &str, value: &toml::Value) -> Result<Vec<String>, ConfigError> {
    let items = parse_string_list(key, value)?;
    Ok(items
        .into_iter()
        .filter(|s| match Url::parse(s) {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(key, "dropping invalid URL `{}`", s);
                false
            }
        })
        .collect())
}

fn parse_regex(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    let raw = parse_string(key, value)?;
    Regex::new(&raw).map_err(|source| ConfigError::InvalidRegex {
        key: key.to_string(),
        source,
    })?;
    Ok(raw)
}

fn parse_portal_mode(key: &str, value: &toml::Value) -> Result<PortalMode, ConfigError> {
    match parse_string(key, value)?.to_ascii_lowercase().as_str() {
        "prompt" => Ok(PortalMode::Prompt),
        "avoid" => Ok(PortalMode::Avoid),
        "ignore" => Ok(PortalMode::Ignore),
        _ => Err(wrong_type(key, "one of prompt, avoid, ignore")),
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("netmon")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Dynamic override file; read when present, never created.
pub fn override_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("netmon")?;
    Ok(xdg_dirs.get_config_home().join("overrides.toml"))
}

/// Read a TOML table. A missing file is `None`; a malformed one is logged and also `None`.
fn read_layer(path: &Path) -> Result<Option<toml::Table>> {
    if !path.exists() {
        return Ok(None);
    }
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match data.parse::<toml::Table>() {
        Ok(table) => Ok(Some(table)),
        Err(e) => {
            tracing::warn!("ignoring malformed config {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Resolve a snapshot from an explicit resource file and optional override file.
pub fn load_from(resource: &Path, overrides: Option<&Path>) -> Result<MonitorConfig> {
    let override_layer = match overrides {
        Some(p) => read_layer(p)?,
        None => None,
    };
    let layers = ConfigLayers::new()
        .with_layer("override", override_layer)
        .with_layer("resource", read_layer(resource)?);
    Ok(layers.resolve())
}

/// Load configuration from disk, creating a default resource file if none exists.
pub fn load_or_init() -> Result<MonitorConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MonitorConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
    }
    load_from(&path, Some(&override_path()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn table(s: &str) -> Option<toml::Table> {
        Some(s.parse::<toml::Table>().unwrap())
    }

    #[test]
    fn default_config_values() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.consecutive_dns_timeout_threshold, 5);
        assert_eq!(cfg.initial_reevaluate_delay_ms, 1_000);
        assert_eq!(cfg.max_reevaluate_delay_ms, 600_000);
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert!(cfg.dns_stall_enabled());
        assert!(cfg.tcp_stall_enabled());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MonitorConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MonitorConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn override_beats_resource_beats_default() {
        let layers = ConfigLayers::new()
            .with_layer("override", table("probe_timeout_ms = 100"))
            .with_layer(
                "resource",
                table("probe_timeout_ms = 200\nconsecutive_dns_timeout_threshold = 3"),
            );
        let cfg = layers.resolve();
        assert_eq!(cfg.probe_timeout_ms, 100);
        assert_eq!(cfg.consecutive_dns_timeout_threshold, 3);
        assert_eq!(cfg.tcp_polling_interval_ms, 20_000);
    }

    #[traced_test]
    #[test]
    fn bad_value_falls_through_to_next_layer() {
        let layers = ConfigLayers::new()
            .with_layer(
                "override",
                table(
                    "https_url = \"not a url\"\nsuccess_content_regex = \"(\"\nuse_https = \"yes\"",
                ),
            )
            .with_layer(
                "resource",
                table("https_url = \"https://probe.example/gen\"\nsuccess_content_regex = \"ok.*\""),
            );
        let cfg = layers.resolve();
        assert_eq!(cfg.https_url, "https://probe.example/gen");
        assert_eq!(cfg.success_content_regex.as_deref(), Some("ok.*"));
        assert!(cfg.use_https);
        assert!(logs_contain("ignoring config value"));
    }

    #[test]
    fn url_lists_accept_arrays_and_comma_strings() {
        let layers = ConfigLayers::new().with_layer(
            "resource",
            table(
                "http_urls = \"http://a.example/gen, bogus ,http://b.example/gen\"\n\
                 https_urls = [\"https://c.example/gen\"]",
            ),
        );
        let cfg = layers.resolve();
        assert_eq!(
            cfg.http_urls,
            vec!["http://a.example/gen".to_string(), "http://b.example/gen".to_string()]
        );
        assert_eq!(cfg.https_urls, vec!["https://c.example/gen".to_string()]);
    }

    #[test]
    fn portal_mode_parses_case_insensitively() {
        let cfg = ConfigLayers::new()
            .with_layer("resource", table("portal_mode = \"IGNORE\""))
            .resolve();
        assert_eq!(cfg.portal_mode, PortalMode::Ignore);
    }

    #[test]
    fn load_from_files_and_malformed_override() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("config.toml");
        let overrides = dir.path().join("overrides.toml");
        fs::write(&resource, "max_reevaluate_delay_ms = 5000\n").unwrap();
        fs::write(&overrides, "this is = = not toml").unwrap();
        let cfg = load_from(&resource, Some(&overrides)).unwrap();
        assert_eq!(cfg.max_reevaluate_delay_ms, 5000);

        let missing = dir.path().join("missing.toml");
        let cfg = load_from(&missing, None).unwrap();
        assert_eq!(cfg, MonitorConfig::default());
    }
}
