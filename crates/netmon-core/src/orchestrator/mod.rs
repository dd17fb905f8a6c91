//! Probe orchestration: which probes a cycle runs, and how their results combine.

mod plan;
mod race;

pub use plan::{build_plan, ProbePlan};
pub use race::{run_cycle, CycleEvent, CycleVerdict};
