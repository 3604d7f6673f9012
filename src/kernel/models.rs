//! Kernel launch configuration and handles.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource profile requested for a session's kernel.
///
/// Limits are passed to the kernel entry process through its environment; the
/// gateway does not interpret them beyond that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Extra environment variables scoped to the session.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Memory ceiling in megabytes, if any.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// CPU ceiling in percent of one core, if any.
    #[serde(default)]
    pub cpu_limit_percent: Option<u32>,
}

/// Everything the launcher needs to start a kernel for one session.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    /// Owning session id; also names the isolated working directory.
    pub session_id: String,
    /// Owning user, exported to the kernel environment.
    pub owner: String,
    pub profile: ResourceProfile,
}

/// Handle to a spawned kernel.
#[derive(Debug, Clone)]
pub struct KernelHandle {
    /// Launcher-assigned id for the process table.
    pub id: String,
    /// OS process id, when the kernel is a native process.
    pub pid: Option<u32>,
    /// Address the kernel is listening on.
    pub address: SocketAddr,
}

/// Configuration for the process-backed kernel manager.
#[derive(Debug, Clone)]
pub struct KernelManagerConfig {
    /// Kernel entry-point binary.
    pub command: String,
    /// Arguments passed to the entry point.
    pub args: Vec<String>,
    /// Root under which each session gets its own working directory.
    pub workdir_root: PathBuf,
    /// Optional provisioning command run (via the shell) in the session
    /// workdir before the kernel starts.
    pub provision_command: Option<String>,
    /// Maximum number of concurrently live kernels.
    pub max_kernels: usize,
    /// How long to wait for the kernel to start listening.
    pub spawn_timeout: Duration,
    /// How long to wait after the shutdown signal before force-killing.
    pub terminate_grace_period: Duration,
}

impl Default for KernelManagerConfig {
    fn default() -> Self {
        Self {
            command: "kernel-server".to_string(),
            args: Vec::new(),
            workdir_root: std::env::temp_dir().join("kernelhub"),
            provision_command: None,
            max_kernels: 32,
            spawn_timeout: Duration::from_secs(30),
            terminate_grace_period: Duration::from_secs(10),
        }
    }
}
