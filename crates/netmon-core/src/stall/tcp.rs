use crate::network::Capabilities;

/// TCP socket health sampler owned by the host.
///
/// The only collaborator allowed its own thread-safe sampling; the monitor
/// calls `poll_sockets_info` on its polling interval and reads the latest
/// figures when evaluating a stall.
pub trait TcpHealth: Send + Sync {
    /// Packets received during the last polling interval.
    fn latest_received_count(&self) -> i32;
    /// Packet failure rate over the last interval, 0-100.
    fn latest_packet_fail_percentage(&self) -> i32;
    fn sent_since_last_recv(&self) -> i32;
    /// The sampler's own verdict from its thresholds.
    fn is_stall_suspected(&self) -> bool;
    /// Take a new sample. Returns false when sampling failed.
    fn poll_sockets_info(&self) -> bool;
    fn set_capabilities(&self, capabilities: &Capabilities);
    /// Opportunistic private DNS changes which sockets count as DNS traffic.
    fn set_opportunistic_mode(&self, enabled: bool);
}

/// Sampler for hosts without TCP statistics: never suspects a stall.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTcpHealth;

impl TcpHealth for NoTcpHealth {
    fn latest_received_count(&self) -> i32 {
        0
    }

    fn latest_packet_fail_percentage(&self) -> i32 {
        0
    }

    fn sent_since_last_recv(&self) -> i32 {
        0
    }

    fn is_stall_suspected(&self) -> bool {
        false
    }

    fn poll_sockets_info(&self) -> bool {
        false
    }

    fn set_capabilities(&self, _capabilities: &Capabilities) {}

    fn set_opportunistic_mode(&self, _enabled: bool) {}
}
