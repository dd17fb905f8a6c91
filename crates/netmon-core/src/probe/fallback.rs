//! Fallback probe selection and device-supplied fallback specs.

use regex::Regex;
use url::Url;

use super::classify::{compile_full_match, redirect_target, Classification};
use super::transport::HttpResponse;
use super::ProbeOutcome;
use crate::config::MonitorConfig;
use crate::error::ConfigError;

const SPEC_SEPARATOR: &str = "@@,@@";
const FIELD_SEPARATOR: &str = "@@/@@";

/// `url@@/@@statusRegex@@/@@locationRegex`: success iff the status matches and
/// the `Location` header (when both it and the regex are present) matches.
#[derive(Debug, Clone)]
pub struct FallbackSpec {
    pub url: Url,
    status: Regex,
    location: Option<Regex>,
}

impl FallbackSpec {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidFallbackSpec(raw.to_string());
        let fields: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let [url, status, location] = fields.as_slice() else {
            return Err(invalid());
        };
        let url = Url::parse(url.trim()).map_err(|_| invalid())?;
        let status = compile_full_match("fallback status regex", status.trim()).ok_or_else(invalid)?;
        let location = match location.trim() {
            "" => None,
            pattern => Some(compile_full_match("fallback location regex", pattern).ok_or_else(invalid)?),
        };
        Ok(Self {
            url,
            status,
            location,
        })
    }

    pub fn classify(&self, response: &HttpResponse) -> Classification {
        let status_matches = self.status.is_match(&response.status.to_string());
        let location = response.location().map(str::trim).unwrap_or("");
        let location_matches = match &self.location {
            None => true,
            Some(_) if location.is_empty() => true,
            Some(re) => re.is_match(location),
        };
        if status_matches && location_matches {
            Classification {
                outcome: ProbeOutcome::Success,
                redirect_url: None,
            }
        } else {
            Classification::portal(redirect_target(&self.url, response.location()))
        }
    }
}

/// Which fallback target a cycle would probe.
#[derive(Debug, Clone)]
pub enum FallbackChoice {
    Url(Url),
    Spec(FallbackSpec),
    /// The chosen entry did not parse; no request is made.
    Skipped(String),
}

impl FallbackChoice {
    pub fn url(&self) -> Option<&Url> {
        match self {
            FallbackChoice::Url(u) => Some(u),
            FallbackChoice::Spec(s) => Some(&s.url),
            FallbackChoice::Skipped(_) => None,
        }
    }
}

/// Raw spec entries in configuration order.
pub fn split_specs(raw: &str) -> Vec<&str> {
    raw.split(SPEC_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pick the fallback for this cycle.
///
/// Device specs take precedence and are always indexed by `index mod K` over the
/// raw entries. Plain fallback URLs drop unparsable entries first, then use entry 0
/// on the first attempt and `index mod K` after.
pub fn choose_fallback(cfg: &MonitorConfig, first_attempt: bool, index: u32) -> Option<FallbackChoice> {
    if let Some(raw) = cfg.fallback_probe_specs.as_deref() {
        let specs = split_specs(raw);
        if !specs.is_empty() {
            let entry = specs[index as usize % specs.len()];
            return Some(match FallbackSpec::parse(entry) {
                Ok(spec) => FallbackChoice::Spec(spec),
                Err(e) => {
                    tracing::warn!("skipping fallback: {}", e);
                    FallbackChoice::Skipped(entry.to_string())
                }
            });
        }
    }
    let urls: Vec<Url> = cfg
        .fallback_urls
        .iter()
        .filter_map(|entry| match Url::parse(entry.trim()) {
            Ok(url) => Some(url),
            Err(_) => {
                tracing::warn!("skipping invalid fallback URL `{}`", entry);
                None
            }
        })
        .collect();
    if urls.is_empty() {
        return None;
    }
    let i = if first_attempt {
        0
    } else {
        index as usize % urls.len()
    };
    Some(FallbackChoice::Url(urls[i].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &str = "http://example.com@@/@@204@@/@@\
                         @@,@@\
                         http://other.example/gen@@/@@30[12]@@/@@https://(www\\.)?google.com/?.*";

    fn cfg_with_specs(specs: &str) -> MonitorConfig {
        MonitorConfig {
            fallback_probe_specs: Some(specs.to_string()),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn spec_is_chosen_by_index_mod_len() {
        let cfg = cfg_with_specs(SPECS);
        for (index, host) in [(0, "example.com"), (1, "other.example"), (7, "other.example")] {
            match choose_fallback(&cfg, true, index) {
                Some(FallbackChoice::Spec(spec)) => assert_eq!(spec.url.host_str(), Some(host)),
                other => panic!("expected spec, got {:?}", other),
            }
        }
    }

    #[test]
    fn unparsable_spec_is_skipped() {
        let cfg = cfg_with_specs("not a url@@/@@204@@/@@@@,@@http://ok.example@@/@@204@@/@@");
        assert!(matches!(choose_fallback(&cfg, false, 0), Some(FallbackChoice::Skipped(_))));
        assert!(matches!(choose_fallback(&cfg, false, 1), Some(FallbackChoice::Spec(_))));
    }

    #[test]
    fn spec_needs_three_fields_and_valid_regex() {
        assert!(FallbackSpec::parse("http://a.example@@/@@204").is_err());
        assert!(FallbackSpec::parse("http://a.example@@/@@(@@/@@").is_err());
        assert!(FallbackSpec::parse("http://a.example@@/@@204@@/@@").is_ok());
    }

    #[test]
    fn spec_classification() {
        let spec = FallbackSpec::parse(split_specs(SPECS)[1]).unwrap();
        let ok = HttpResponse::new(302).with_header("Location", "https://www.google.com/test?q=3");
        assert_eq!(spec.classify(&ok).outcome, ProbeOutcome::Success);

        let portal = HttpResponse::new(302).with_header("Location", "http://login.example/");
        let c = spec.classify(&portal);
        assert_eq!(c.outcome, ProbeOutcome::Portal);
        assert_eq!(c.redirect_url.as_deref(), Some("http://login.example/"));

        // Status must match; empty location counts as matching.
        assert_eq!(spec.classify(&HttpResponse::new(204)).outcome, ProbeOutcome::Portal);
        assert_eq!(spec.classify(&HttpResponse::new(301)).outcome, ProbeOutcome::Success);
    }

    #[test]
    fn fallback_urls_first_attempt_uses_first_entry() {
        let cfg = MonitorConfig {
            fallback_urls: vec![
                "http://first.example/".to_string(),
                "::bad::".to_string(),
                "http://third.example/".to_string(),
            ],
            ..MonitorConfig::default()
        };
        let first = choose_fallback(&cfg, true, 2).unwrap();
        assert_eq!(first.url().unwrap().host_str(), Some("first.example"));
        // Two usable entries: 1 mod 2 picks the second one.
        let later = choose_fallback(&cfg, false, 1).unwrap();
        assert_eq!(later.url().unwrap().host_str(), Some("third.example"));
        let wrapped = choose_fallback(&cfg, false, 2).unwrap();
        assert_eq!(wrapped.url().unwrap().host_str(), Some("first.example"));
    }

    #[test]
    fn invalid_fallback_urls_are_dropped_before_indexing() {
        let cfg = MonitorConfig {
            fallback_urls: vec!["invalid".to_string(), "http://ok.example/gen".to_string()],
            ..MonitorConfig::default()
        };
        match choose_fallback(&cfg, true, 0) {
            Some(FallbackChoice::Url(url)) => assert_eq!(url.host_str(), Some("ok.example")),
            other => panic!("expected the valid URL, got {:?}", other),
        }

        let cfg = MonitorConfig {
            fallback_urls: vec!["invalid".to_string(), "::also bad::".to_string()],
            ..MonitorConfig::default()
        };
        assert!(choose_fallback(&cfg, false, 3).is_none());
    }

    #[test]
    fn no_fallback_configured() {
        let cfg = MonitorConfig {
            fallback_urls: Vec::new(),
            ..MonitorConfig::default()
        };
        assert!(choose_fallback(&cfg, true, 0).is_none());
    }
}
