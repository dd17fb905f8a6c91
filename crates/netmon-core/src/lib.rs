pub mod config;
pub mod control;
pub mod error;
pub mod evaluation;
pub mod logging;
pub mod monitor;
pub mod network;
pub mod observer;
pub mod orchestrator;
pub mod private_dns;
pub mod probe;
pub mod reevaluate;
pub mod stall;
