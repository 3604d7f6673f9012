//! Spawn and termination outcomes.

use std::time::Duration;

use thiserror::Error;

/// Errors starting a kernel. A failed spawn moves the session to `Failed`;
/// it is never retried automatically.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The kernel process never reported a listening address in time. The
    /// child has already been killed when this is returned.
    #[error("kernel did not become reachable within {0:?}")]
    Timeout(Duration),

    /// The external provisioning step exited non-zero.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// The manager is at its configured kernel capacity.
    #[error("kernel capacity exhausted ({0} live kernels)")]
    ResourceExhausted(usize),

    #[error("failed to launch kernel process: {0}")]
    Io(#[from] std::io::Error),
}

/// How a kernel shut down. Both outcomes are successful terminations; they
/// are logged differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationResult {
    /// The kernel exited within the grace period after the shutdown signal.
    Graceful,
    /// The kernel had to be force-killed.
    Forced,
}

impl std::fmt::Display for TerminationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationResult::Graceful => write!(f, "graceful"),
            TerminationResult::Forced => write!(f, "forced"),
        }
    }
}
