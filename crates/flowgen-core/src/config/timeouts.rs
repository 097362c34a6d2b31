//! Centralized timeout defaults
//!
//! Every value can be overridden through `BridgeConfig`.

use std::time::Duration;

/// Default time the worker has to announce readiness (5 seconds)
pub const HANDSHAKE_MS: u64 = 5_000;

/// Default time a liveness probe may stay unanswered (5 seconds)
pub const PROBE_MS: u64 = 5_000;

/// Grace period for the worker to exit after being killed on disposal (2 seconds)
pub const KILL_GRACE_MS: u64 = 2_000;

/// Get kill grace period as Duration
pub fn kill_grace() -> Duration {
    Duration::from_millis(KILL_GRACE_MS)
}
