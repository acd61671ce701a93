pub mod cli;
pub mod controller;
pub mod log;

pub use controller::{Controller, ServiceTarget, build_registry, signal_for};
