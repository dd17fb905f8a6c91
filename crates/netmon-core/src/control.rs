//! Cycle cancellation: generation counters and shared abort tokens.
//!
//! Every probing cycle (and every private DNS resolution) gets a fresh
//! generation. Results carry the generation they were started under and the
//! monitor drops any that no longer match. The abort token lets blocking curl
//! transfers of a superseded cycle stop early instead of running to timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked by in-flight transfers.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Generation counter plus the abort token of the current generation.
#[derive(Debug, Default)]
pub struct CycleControl {
    generation: u64,
    token: AbortToken,
    active: bool,
}

impl CycleControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede the current generation and start a new one.
    pub fn begin(&mut self) -> (u64, AbortToken) {
        self.token.abort();
        self.generation += 1;
        self.token = AbortToken::new();
        self.active = true;
        (self.generation, self.token.clone())
    }

    /// Abort the current generation without starting another; its results become stale.
    pub fn cancel(&mut self) {
        self.token.abort();
        self.generation += 1;
        self.active = false;
    }

    /// Mark the current generation finished (its results were consumed).
    pub fn finish(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.active = false;
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_supersedes_previous_generation() {
        let mut control = CycleControl::new();
        let (g1, t1) = control.begin();
        let (g2, t2) = control.begin();
        assert!(t1.is_aborted());
        assert!(!t2.is_aborted());
        assert!(!control.is_current(g1));
        assert!(control.is_current(g2));
    }

    #[test]
    fn cancel_makes_everything_stale() {
        let mut control = CycleControl::new();
        let (g, t) = control.begin();
        control.cancel();
        assert!(t.is_aborted());
        assert!(!control.is_current(g));
        assert!(!control.is_active());
    }

    #[test]
    fn finish_only_affects_current() {
        let mut control = CycleControl::new();
        let (g1, _) = control.begin();
        let (g2, _) = control.begin();
        control.finish(g1);
        assert!(control.is_active());
        control.finish(g2);
        assert!(!control.is_active());
        assert!(!control.is_current(g2));
    }
}
