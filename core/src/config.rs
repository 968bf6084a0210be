//! Runtime configuration for the supervisor
//!
//! The supervisor carries no configuration files; the only tunables are the
//! two bounded waits used during mass termination.

use crate::{CoreError, Result};
use std::time::Duration;

/// Tunable timing parameters for the supervision loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// How long to wait for children to exit after SIGTERM before
    /// escalating to SIGKILL.
    pub grace: Duration,

    /// How long to wait for stragglers to be reaped after SIGKILL.
    /// SIGKILL cannot be ignored, so this only needs to cover scheduler
    /// latency; it exists so every slot is observably dead before the
    /// supervisor exits or relaunches.
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(1),
            kill_grace: Duration::from_millis(500),
        }
    }
}

impl SupervisorConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> Result<()> {
        if self.grace.is_zero() {
            return Err(CoreError::ConfigurationError(
                "grace period must be greater than zero".to_string(),
            ));
        }
        if self.kill_grace.is_zero() {
            return Err(CoreError::ConfigurationError(
                "kill grace period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
