//! logmedic library crate
//!
//! Exposes the monitoring pipeline so the binary and integration tests can
//! exercise it without going through CLI startup.

pub mod analyze;
pub mod config;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod monitor;
pub mod onboarding;
pub mod patterns;
pub mod remediate;
pub mod scan;
pub mod util;
