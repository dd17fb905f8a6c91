use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::DNS_RETURN_TIMEOUT;

const MIN_LOG_CAPACITY: usize = 20;

/// One DNS lookup outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsEvent {
    pub return_code: i32,
    pub at: Instant,
}

/// Bounded log of recent DNS outcomes plus the trailing timeout streak.
#[derive(Debug, Clone)]
pub struct DnsStallDetector {
    events: VecDeque<DnsEvent>,
    capacity: usize,
    consecutive_timeouts: u32,
}

impl DnsStallDetector {
    pub fn new(threshold: u32) -> Self {
        let capacity = MIN_LOG_CAPACITY.max(threshold as usize);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            consecutive_timeouts: 0,
        }
    }

    /// Adjust capacity for a new threshold, dropping the oldest entries if it shrinks.
    pub fn resize(&mut self, threshold: u32) {
        self.capacity = MIN_LOG_CAPACITY.max(threshold as usize);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn accumulate(&mut self, return_code: i32, at: Instant) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(DnsEvent { return_code, at });
        if return_code == DNS_RETURN_TIMEOUT {
            self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        } else {
            self.consecutive_timeouts = 0;
        }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// At least `threshold` trailing timeouts, the `threshold`-th most recent of
    /// which is younger than `valid_window`.
    pub fn is_suspected(&self, threshold: u32, valid_window: Duration, now: Instant) -> bool {
        let threshold = threshold.max(1);
        if self.consecutive_timeouts < threshold {
            return false;
        }
        let Some(index) = self.events.len().checked_sub(threshold as usize) else {
            return false;
        };
        now.saturating_duration_since(self.events[index].at) < valid_window
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<DnsEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stall::DNS_RETURN_SUCCESS;

    const WINDOW: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn threshold_consecutive_timeouts_are_suspected() {
        let t0 = Instant::now();
        let mut d = DnsStallDetector::new(5);
        for i in 0..5 {
            d.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_secs(i));
        }
        assert_eq!(d.consecutive_timeouts(), 5);
        assert!(d.is_suspected(5, WINDOW, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn success_resets_streak() {
        let t0 = Instant::now();
        let mut d = DnsStallDetector::new(5);
        for _ in 0..5 {
            d.accumulate(DNS_RETURN_TIMEOUT, t0);
        }
        d.accumulate(DNS_RETURN_SUCCESS, t0);
        assert_eq!(d.consecutive_timeouts(), 0);
        for _ in 0..4 {
            d.accumulate(DNS_RETURN_TIMEOUT, t0);
        }
        assert!(!d.is_suspected(5, WINDOW, t0));
        d.accumulate(DNS_RETURN_TIMEOUT, t0);
        assert!(d.is_suspected(5, WINDOW, t0));
    }

    #[test]
    fn old_timeouts_do_not_count() {
        let t0 = Instant::now();
        let mut d = DnsStallDetector::new(3);
        d.accumulate(DNS_RETURN_TIMEOUT, t0);
        d.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_secs(100));
        d.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_secs(200));
        let window = Duration::from_secs(150);
        assert!(!d.is_suspected(3, window, t0 + Duration::from_secs(200)));
        // One more timeout moves the third-most-recent inside the window.
        d.accumulate(DNS_RETURN_TIMEOUT, t0 + Duration::from_secs(210));
        assert!(d.is_suspected(3, window, t0 + Duration::from_secs(210)));
    }

    #[test]
    fn log_is_bounded() {
        let t0 = Instant::now();
        let mut d = DnsStallDetector::new(5);
        for _ in 0..50 {
            d.accumulate(DNS_RETURN_SUCCESS, t0);
        }
        assert_eq!(d.len(), 20);
        let mut big = DnsStallDetector::new(30);
        for _ in 0..50 {
            big.accumulate(DNS_RETURN_TIMEOUT, t0);
        }
        assert_eq!(big.len(), 30);
        assert_eq!(big.consecutive_timeouts(), 50);
        assert!(big.is_suspected(30, WINDOW, t0));
    }

    #[test]
    fn recent_events_are_chronological() {
        let t0 = Instant::now();
        let mut d = DnsStallDetector::new(5);
        for i in 0..4 {
            d.accumulate(i, t0 + Duration::from_secs(i as u64));
        }
        let codes: Vec<i32> = d.recent_events(2).iter().map(|e| e.return_code).collect();
        assert_eq!(codes, vec![2, 3]);
        assert_eq!(d.recent_events(10).len(), 4);
    }
}
