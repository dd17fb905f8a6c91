//! Value types describing the monitored network: capabilities and link configuration.

use serde::{Deserialize, Serialize};

/// Link-layer transport carried by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Cellular,
    Wifi,
    Bluetooth,
    Ethernet,
    Vpn,
    Other,
}

/// Capability flags consumed by validation and stall detection.
///
/// `Default` is an empty set (no transports, nothing granted); use
/// [`Capabilities::wifi`] or [`Capabilities::cellular`] for a typical
/// internet-providing network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub transports: Vec<Transport>,
    pub internet: bool,
    pub trusted: bool,
    pub not_restricted: bool,
    pub not_suspended: bool,
    pub not_metered: bool,
    /// Dial-up/tethering (DUN) network.
    pub tethering: bool,
    /// Network underlying a virtual carrier network; validated even when restricted.
    pub vcn_managed: bool,
    /// Paid OEM network; validated when trusted even if restricted.
    pub oem_paid: bool,
}

impl Capabilities {
    pub fn wifi() -> Self {
        Self {
            transports: vec![Transport::Wifi],
            internet: true,
            trusted: true,
            not_restricted: true,
            not_suspended: true,
            not_metered: true,
            ..Self::default()
        }
    }

    pub fn cellular() -> Self {
        Self {
            transports: vec![Transport::Cellular],
            internet: true,
            trusted: true,
            not_restricted: true,
            not_suspended: true,
            not_metered: false,
            ..Self::default()
        }
    }

    pub fn has_transport(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }

    pub fn is_suspended(&self) -> bool {
        !self.not_suspended
    }

    /// Whether probing should run at all for this capability set.
    ///
    /// Networks that fail this gate are reported VALID|SKIPPED without any I/O.
    pub fn requires_validation(&self, validate_tethering: bool) -> bool {
        if self.tethering && !self.not_restricted {
            return validate_tethering;
        }
        if !self.internet || self.transports.is_empty() {
            return false;
        }
        let default_capable = self.trusted && self.not_restricted;
        let oem_paid = self.oem_paid && self.trusted;
        default_capable || oem_paid || self.vcn_managed
    }

    /// TCP stall eligibility: validation required and not suspended.
    pub fn eligible_for_stall_detection(&self, validate_tethering: bool) -> bool {
        self.requires_validation(validate_tethering) && !self.is_suspended()
    }
}

/// Link configuration; only the fields validation consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub interface_name: Option<String>,
    /// Captive portal API endpoint advertised by the network (DHCP/RA option).
    pub portal_api_url: Option<String>,
}

impl LinkConfig {
    pub fn with_portal_api(mut self, url: impl Into<String>) -> Self {
        self.portal_api_url = Some(url.into());
        self
    }
}
