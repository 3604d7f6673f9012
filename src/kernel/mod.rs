//! Kernel process lifecycle management.
//!
//! The hub talks to kernels through the [`KernelLauncher`] trait. The
//! production implementation, [`KernelManager`], spawns one native process per
//! session in an isolated working directory. Tests substitute a mock
//! launcher, so orchestration logic never depends on real processes.

mod error;
mod manager;
mod models;

pub use error::{SpawnError, TerminationResult};
pub use manager::KernelManager;
pub use models::{KernelHandle, KernelManagerConfig, KernelSpec, ResourceProfile};

use async_trait::async_trait;

/// Interface between the hub orchestrator and kernel execution environments.
///
/// A kernel is opaque to the gateway: the only things it exposes are a
/// listening address and liveness.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    /// Allocate an isolated environment, start the kernel entry process, and
    /// wait until it reports a listening address or the startup timeout
    /// elapses.
    async fn spawn(&self, spec: &KernelSpec) -> Result<KernelHandle, SpawnError>;

    /// Shut the kernel down: graceful signal first, force-kill after the
    /// grace period. Idempotent; terminating an unknown handle is a graceful
    /// no-op.
    async fn terminate(&self, handle: &KernelHandle) -> TerminationResult;

    /// Liveness probe used by the reaper to detect crashed kernels.
    async fn is_alive(&self, handle: &KernelHandle) -> bool;
}
