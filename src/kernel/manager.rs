//! Process-backed kernel manager.
//!
//! Spawns one kernel process per session with an isolated working directory
//! and session-scoped environment, and owns the table of live processes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{SpawnError, TerminationResult};
use super::models::{KernelHandle, KernelManagerConfig, KernelSpec};
use super::KernelLauncher;

/// A tracked kernel process.
#[derive(Debug)]
struct ManagedKernel {
    child: Child,
    pid: u32,
    session_id: String,
    address: SocketAddr,
}

impl ManagedKernel {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Manager for native kernel processes.
///
/// The process table is the only shared state and is exclusively owned by
/// this component.
pub struct KernelManager {
    config: KernelManagerConfig,
    table: Arc<Mutex<HashMap<String, ManagedKernel>>>,
}

impl KernelManager {
    pub fn new(config: KernelManagerConfig) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count live kernels, pruning entries whose process already exited.
    async fn live_count(&self) -> usize {
        let mut table = self.table.lock().await;
        table.retain(|id, managed| {
            let running = managed.is_running();
            if !running {
                warn!("pruning exited kernel {} (session {})", id, managed.session_id);
            }
            running
        });
        table.len()
    }

    /// Run the external provisioning step in the session workdir.
    ///
    /// The step is opaque to the gateway; all that matters is its exit
    /// status and that it leaves the kernel entry point runnable.
    async fn provision(&self, workdir: &Path, spec: &KernelSpec) -> Result<(), SpawnError> {
        let Some(ref command) = self.config.provision_command else {
            return Ok(());
        };

        debug!("provisioning session {} via `{}`", spec.session_id, command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .env("KERNEL_SESSION_ID", &spec.session_id)
            .env("KERNEL_WORKDIR", workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SpawnError::ProvisioningFailed(format!(
                "{} ({})",
                stderr.trim(),
                output.status
            )))
        }
    }

    /// Wait until the kernel accepts TCP connections on its address, or fail
    /// with `Timeout` once the startup budget is spent.
    async fn wait_for_listening(
        &self,
        child: &mut Child,
        address: SocketAddr,
    ) -> Result<(), SpawnError> {
        let start = tokio::time::Instant::now();
        let timeout = self.config.spawn_timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            if let Ok(Some(status)) = child.try_wait() {
                return Err(SpawnError::Io(std::io::Error::other(format!(
                    "kernel exited during startup with {status}"
                ))));
            }

            if TcpStream::connect(address).await.is_ok() {
                debug!(
                    "kernel reachable at {} after {} attempts",
                    address, attempts
                );
                return Ok(());
            }

            if start.elapsed() >= timeout {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(SpawnError::Timeout(timeout));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Terminate every tracked kernel. Used on hub shutdown.
    pub async fn shutdown_all(&self) {
        let handles: Vec<KernelHandle> = {
            let table = self.table.lock().await;
            table
                .iter()
                .map(|(id, managed)| KernelHandle {
                    id: id.clone(),
                    pid: Some(managed.pid),
                    address: managed.address,
                })
                .collect()
        };

        for handle in handles {
            let result = self.terminate(&handle).await;
            info!("shutdown: kernel {} terminated ({})", handle.id, result);
        }
    }
}

#[async_trait]
impl KernelLauncher for KernelManager {
    async fn spawn(&self, spec: &KernelSpec) -> Result<KernelHandle, SpawnError> {
        let live = self.live_count().await;
        if live >= self.config.max_kernels {
            return Err(SpawnError::ResourceExhausted(live));
        }

        let workdir = self.config.workdir_root.join(&spec.session_id);
        std::fs::create_dir_all(&workdir)?;

        self.provision(&workdir, spec).await?;

        let port = allocate_port()?;
        let address: SocketAddr = ([127, 0, 0, 1], port).into();

        info!(
            "spawning kernel for session {} on port {}",
            spec.session_id, port
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(&workdir)
            .env("KERNEL_PORT", port.to_string())
            .env("KERNEL_SESSION_ID", &spec.session_id)
            .env("KERNEL_USER", &spec.owner)
            .env("KERNEL_WORKDIR", &workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &spec.profile.env {
            cmd.env(key, value);
        }
        if let Some(limit) = spec.profile.memory_limit_mb {
            cmd.env("KERNEL_MEMORY_LIMIT_MB", limit.to_string());
        }
        if let Some(limit) = spec.profile.cpu_limit_percent {
            cmd.env("KERNEL_CPU_LIMIT_PERCENT", limit.to_string());
        }

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("kernel exited before a PID was available"))?;

        self.wait_for_listening(&mut child, address).await?;

        let handle = KernelHandle {
            id: Uuid::new_v4().to_string(),
            pid: Some(pid),
            address,
        };

        let mut table = self.table.lock().await;
        table.insert(
            handle.id.clone(),
            ManagedKernel {
                child,
                pid,
                session_id: spec.session_id.clone(),
                address,
            },
        );

        info!(
            "kernel for session {} running with PID {} at {}",
            spec.session_id, pid, address
        );
        Ok(handle)
    }

    async fn terminate(&self, handle: &KernelHandle) -> TerminationResult {
        let mut managed = {
            let mut table = self.table.lock().await;
            match table.remove(&handle.id) {
                Some(managed) => managed,
                // Already terminated (or never tracked). Idempotent no-op.
                None => return TerminationResult::Graceful,
            }
        };

        debug!(
            "terminating kernel {} (session {}, PID {})",
            handle.id, managed.session_id, managed.pid
        );

        if !send_term_signal(managed.pid).await && !managed.is_running() {
            return TerminationResult::Graceful;
        }

        match tokio::time::timeout(self.config.terminate_grace_period, managed.child.wait()).await
        {
            Ok(_) => TerminationResult::Graceful,
            Err(_) => {
                warn!(
                    "kernel {} (PID {}) ignored shutdown signal, force-killing",
                    handle.id, managed.pid
                );
                if let Err(e) = managed.child.kill().await {
                    warn!("failed to kill kernel PID {}: {:?}", managed.pid, e);
                }
                let _ = managed.child.wait().await;
                TerminationResult::Forced
            }
        }
    }

    async fn is_alive(&self, handle: &KernelHandle) -> bool {
        let mut table = self.table.lock().await;
        match table.get_mut(&handle.id) {
            Some(managed) => managed.is_running(),
            None => false,
        }
    }
}

/// Send SIGTERM to a process.
async fn send_term_signal(pid: u32) -> bool {
    Command::new("kill")
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Reserve a free local port by binding to port 0 and releasing it.
fn allocate_port() -> Result<u16, std::io::Error> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
