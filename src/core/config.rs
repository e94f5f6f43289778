/*!
 * Delivery Configuration
 *
 * Runtime knobs for frame construction and the interrupted-call retry path
 */

use crate::arch::STACK_ALIGNMENT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding the interrupted-call receive timeout
pub const RPC_TIMEOUT_ENV: &str = "SIGDELIVER_RPC_TIMEOUT_MS";

/// Signal delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Receive timeout armed on an interrupted call before the retry trampoline reissues it
    pub interrupted_rpc_timeout: Duration,
    /// Call-alignment boundary for signal frames; see `frame_alignment`
    pub stack_alignment: u64,
    /// Fill siginfo codes with POSIX values (legacy handlers always get legacy codes)
    pub posix_codes_for_siginfo: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            interrupted_rpc_timeout: Duration::from_millis(60_000),
            stack_alignment: STACK_ALIGNMENT,
            posix_codes_for_siginfo: true,
        }
    }
}

impl DeliveryConfig {
    /// Short retry timeout, for servers that are expected to answer promptly
    pub fn fast_timeout() -> Self {
        Self {
            interrupted_rpc_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Defaults, with the retry timeout taken from the environment when set and parseable
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var(RPC_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.interrupted_rpc_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Alignment actually applied to frames.
    ///
    /// Values that are not a power of two, or that are below the ABI
    /// minimum, fall back to `arch::STACK_ALIGNMENT`.
    pub fn frame_alignment(&self) -> u64 {
        if self.stack_alignment.is_power_of_two() && self.stack_alignment >= STACK_ALIGNMENT {
            self.stack_alignment
        } else {
            STACK_ALIGNMENT
        }
    }

    /// Timeout in the unit the message trap expects
    pub fn rpc_timeout_ms(&self) -> u64 {
        u64::try_from(self.interrupted_rpc_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
