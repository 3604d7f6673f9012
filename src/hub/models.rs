//! Session data models.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::ResourceProfile;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session record exists, kernel not yet spawning.
    Requested,
    /// Kernel process is starting.
    Starting,
    /// Kernel is reachable and routed.
    Running,
    /// Kernel is being shut down.
    Stopping,
    /// Kernel has shut down cleanly.
    Stopped,
    /// Kernel failed to start or died while running.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Requested => write!(f, "requested"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(SessionState::Requested),
            "starting" => Ok(SessionState::Starting),
            "running" => Ok(SessionState::Running),
            "stopping" => Ok(SessionState::Stopping),
            "stopped" => Ok(SessionState::Stopped),
            "failed" => Ok(SessionState::Failed),
            _ => Err(format!("unknown session state: {}", s)),
        }
    }
}

impl SessionState {
    /// Whether the state is terminal. Terminal sessions are kept for status
    /// queries until the retention window expires, then garbage-collected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

/// A kernel session.
///
/// Sessions live in memory only; a session never outlives the hub process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: String,
    /// Session name, unique per owner among live sessions.
    pub name: String,
    /// Owning user.
    pub owner: String,
    /// Path prefix under which the session's kernel is routed.
    pub route_prefix: String,
    /// Resource profile the kernel was requested with.
    pub resource_profile: ResourceProfile,
    /// Current session state.
    pub state: SessionState,
    /// Backend address of the kernel (once running).
    pub address: Option<String>,
    /// When the session was created.
    pub created_at: String,
    /// When the kernel became reachable.
    pub started_at: Option<String>,
    /// When the session reached a terminal state.
    pub stopped_at: Option<String>,
    /// Last time traffic or a status read touched the session.
    pub last_activity: String,
    /// Error message if failed.
    pub error_message: Option<String>,
}

impl Session {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the session is live (counts against the one-name-per-owner
    /// rule for start requests).
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Request to start a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Session name; forms part of the route prefix.
    pub name: String,
    /// Resource profile for the kernel.
    #[serde(default)]
    pub resource_profile: Option<ResourceProfile>,
}

/// Hub orchestrator configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Stop a running session after this long without traffic.
    pub session_idle_timeout: Duration,
    /// How long terminal sessions stay queryable before garbage collection.
    pub route_retention_window: Duration,
    /// Reaper polling interval.
    pub reaper_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout: Duration::from_secs(30 * 60),
            route_retention_window: Duration::from_secs(5 * 60),
            reaper_interval: Duration::from_secs(5),
        }
    }
}

/// The path prefix a session is routed under.
pub fn route_prefix(owner: &str, name: &str) -> String {
    format!("/users/{}/{}", owner, name)
}
