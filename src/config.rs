//! Bridge session configuration

use std::time::Duration;

/// Tunables for one bridge session.
///
/// The probe gets a longer bound than ordinary calls: worker startup may
/// involve interpreter warm-up and function discovery, while a normal call
/// against a live worker should answer quickly.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Reserved connectivity-check method, callable with empty params
    /// before the connection is marked Connected.
    pub probe_method: String,

    /// Fixed wait between spawning the worker and issuing the probe.
    pub startup_delay: Duration,

    /// Response bound for the probe call.
    pub probe_timeout: Duration,

    /// Response bound for ordinary calls.
    pub call_timeout: Duration,

    /// How many recent stderr lines are kept for crash diagnostics.
    pub stderr_tail: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            probe_method: "list_functions".to_string(),
            startup_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
            stderr_tail: 20,
        }
    }
}
