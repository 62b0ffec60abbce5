//! Shared tunables that are not per-session fixed constants: handshake
//! timeout, listener backlog, idle-reaper interval. Loaded from the
//! daemon's TOML config and passed down into `vdp-core` so library code
//! never reads the filesystem itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_handshake_timeout_secs() -> u64 {
    15
}

fn default_idle_reap_interval_secs() -> u64 {
    30
}

/// Core-level knobs, embedded in the daemon's top-level config struct
/// (spec §6, "configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Deadline for a user to complete the `select`/`args`/`ready`
    /// handshake (spec §4.G, "T (~15s)").
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// How often the session registry sweeps for stopped, empty sessions.
    #[serde(default = "default_idle_reap_interval_secs")]
    pub idle_reap_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            idle_reap_interval_secs: default_idle_reap_interval_secs(),
        }
    }
}

impl CoreConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_reap_interval(&self) -> Duration {
        Duration::from_secs(self.idle_reap_interval_secs)
    }
}
