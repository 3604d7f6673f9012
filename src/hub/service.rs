//! Hub orchestrator - owns the session table and drives the state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::kernel::{KernelHandle, KernelLauncher, KernelSpec, TerminationResult};
use crate::routing::RouteTable;

use super::models::{route_prefix, CreateSessionRequest, HubConfig, Session, SessionState};

/// Errors surfaced to API callers by hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session name: {0}")]
    InvalidName(String),
}

/// Mutable state of one session.
#[derive(Debug)]
struct SessionData {
    session: Session,
    handle: Option<KernelHandle>,
    last_activity: DateTime<Utc>,
    terminal_at: Option<DateTime<Utc>>,
}

impl SessionData {
    fn snapshot(&self) -> Session {
        let mut session = self.session.clone();
        session.last_activity = self.last_activity.to_rfc3339();
        session
    }
}

/// One session's slot in the hub table.
///
/// `op_lock` serializes lifecycle operations (single writer per session);
/// `data` guards the snapshot so status reads never wait behind a spawn.
#[derive(Debug)]
struct SessionSlot {
    op_lock: tokio::sync::Mutex<()>,
    data: Mutex<SessionData>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            op_lock: tokio::sync::Mutex::new(()),
            data: Mutex::new(SessionData {
                session,
                handle: None,
                last_activity: Utc::now(),
                terminal_at: None,
            }),
        }
    }
}

/// Service orchestrating session lifecycles.
///
/// All shared mutable state is the session table here, the route table, and
/// the launcher's process table; each has its own lock discipline.
pub struct HubService {
    launcher: Arc<dyn KernelLauncher>,
    routes: Arc<RouteTable>,
    config: HubConfig,
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl HubService {
    pub fn new(launcher: Arc<dyn KernelLauncher>, routes: Arc<RouteTable>, config: HubConfig) -> Self {
        Self {
            launcher,
            routes,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Start a session for `owner`.
    ///
    /// If the owner already has a live session with the same name, that
    /// session is returned unchanged. A spawn failure is not an `Err`: the
    /// session is recorded as `Failed` and returned, so callers can inspect
    /// the error message.
    ///
    /// The spawn runs on a detached task, so a caller that goes away
    /// mid-start cannot strand the session in `Starting`.
    pub async fn start_session(
        self: &Arc<Self>,
        owner: &str,
        request: CreateSessionRequest,
    ) -> Result<Session, HubError> {
        let name = request.name.trim().to_string();
        validate_name(&name)?;

        let prefix = route_prefix(owner, &name);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

            let existing = slots.values().find(|slot| {
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                data.session.owner == owner && data.session.name == name && data.session.is_active()
            });
            if let Some(slot) = existing {
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                info!(
                    "start request for live session {}/{} returns existing session {}",
                    owner, name, data.session.id
                );
                return Ok(data.snapshot());
            }

            let now = Utc::now();
            let session = Session {
                id: Uuid::new_v4().to_string(),
                name: name.clone(),
                owner: owner.to_string(),
                route_prefix: prefix.clone(),
                resource_profile: request.resource_profile.unwrap_or_default(),
                state: SessionState::Requested,
                address: None,
                created_at: now.to_rfc3339(),
                started_at: None,
                stopped_at: None,
                last_activity: now.to_rfc3339(),
                error_message: None,
            };
            let slot = Arc::new(SessionSlot::new(session.clone()));
            slots.insert(session.id.clone(), slot.clone());
            slot
        };

        let hub = Arc::clone(self);
        let drive_slot = slot.clone();
        let drive = tokio::spawn(async move { hub.drive_start(drive_slot, prefix).await });
        match drive.await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!("start task for session {}/{} failed: {}", owner, name, e);
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                Ok(data.snapshot())
            }
        }
    }

    /// The spawn half of `start_session`. Runs detached from the request
    /// future; the session always leaves `Starting` even if nobody is
    /// waiting for the result.
    async fn drive_start(self: Arc<Self>, slot: Arc<SessionSlot>, prefix: String) -> Session {
        let _guard = slot.op_lock.lock().await;

        // A stop may have won the race for the op lock.
        let (id, owner, name, spec) = {
            let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
            if data.session.state != SessionState::Requested {
                return data.snapshot();
            }
            data.session.state = SessionState::Starting;
            (
                data.session.id.clone(),
                data.session.owner.clone(),
                data.session.name.clone(),
                KernelSpec {
                    session_id: data.session.id.clone(),
                    owner: data.session.owner.clone(),
                    profile: data.session.resource_profile.clone(),
                },
            )
        };

        info!("starting session {} ({}/{})", id, owner, name);

        match self.launcher.spawn(&spec).await {
            Ok(handle) => {
                let address = handle.address.to_string();
                // Route goes in before the session reports Running, so a
                // caller that sees Running always has a resolvable route.
                self.routes.put(prefix.clone(), address.clone());

                let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                data.session.address = Some(address.clone());
                data.session.started_at = Some(Utc::now().to_rfc3339());
                data.session.state = SessionState::Running;
                data.handle = Some(handle);
                data.last_activity = Utc::now();

                info!("session {} running at {} ({})", id, address, prefix);
                data.snapshot()
            }
            Err(e) => {
                warn!("spawn failed for session {}: {}", id, e);

                let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                data.session.state = SessionState::Failed;
                data.session.error_message = Some(e.to_string());
                data.session.stopped_at = Some(Utc::now().to_rfc3339());
                data.terminal_at = Some(Utc::now());
                data.snapshot()
            }
        }
    }

    /// Stop a session by ID. Stopping a terminal session is a no-op that
    /// returns the session unchanged.
    pub async fn stop_session(&self, session_id: &str) -> Result<Session, HubError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| HubError::NotFound(session_id.to_string()))?;
        Ok(self.shutdown_slot(&slot, SessionState::Stopped, None).await)
    }

    /// Get a session by ID. Counts as activity for the idle timeout.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let slot = self.slot(session_id)?;
        let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
        data.last_activity = Utc::now();
        Some(data.snapshot())
    }

    /// List all sessions, including terminal ones still inside the retention
    /// window.
    pub fn list_sessions(&self) -> Vec<Session> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut sessions: Vec<Session> = slots
            .values()
            .map(|slot| {
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                data.snapshot()
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Record proxied traffic for a route prefix. Resets the idle clock.
    pub fn touch_route(&self, prefix: &str) {
        if let Some(slot) = self.slot_by_prefix(prefix) {
            let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
            data.last_activity = Utc::now();
        }
    }

    /// React to an upstream-unavailable report from the proxy: probe the
    /// kernel immediately and clean the session up if it is dead, so stale
    /// routes self-heal without waiting for the next reaper tick.
    pub async fn handle_invalidation(&self, prefix: &str) {
        let Some(slot) = self.slot_by_prefix(prefix) else {
            debug!("invalidation for unknown prefix {}", prefix);
            return;
        };

        let (id, state, handle) = {
            let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
            (
                data.session.id.clone(),
                data.session.state,
                data.handle.clone(),
            )
        };

        if state != SessionState::Running {
            return;
        }
        let Some(handle) = handle else {
            return;
        };

        if self.launcher.is_alive(&handle).await {
            debug!("invalidation for {}: kernel still alive, keeping route", prefix);
            return;
        }

        warn!("kernel for session {} is dead ({}), cleaning up", id, prefix);
        self.shutdown_slot(
            &slot,
            SessionState::Failed,
            Some("kernel process died unexpectedly".to_string()),
        )
        .await;
    }

    /// One reaper pass: fail sessions whose kernel died, stop idle sessions,
    /// garbage-collect terminal sessions past the retention window.
    pub async fn reap(&self) {
        let now = Utc::now();
        let slots: Vec<(String, Arc<SessionSlot>)> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        for (id, slot) in slots {
            let (state, handle, last_activity, terminal_at) = {
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                (
                    data.session.state,
                    data.handle.clone(),
                    data.last_activity,
                    data.terminal_at,
                )
            };

            match state {
                SessionState::Running => {
                    if let Some(ref handle) = handle {
                        if !self.launcher.is_alive(handle).await {
                            warn!("reaper: kernel for session {} died, cleaning up", id);
                            self.shutdown_slot(
                                &slot,
                                SessionState::Failed,
                                Some("kernel process died unexpectedly".to_string()),
                            )
                            .await;
                            continue;
                        }
                    }

                    let idle = (now - last_activity).to_std().unwrap_or_default();
                    if idle >= self.config.session_idle_timeout {
                        info!("reaper: session {} idle for {:?}, stopping", id, idle);
                        self.shutdown_slot(&slot, SessionState::Stopped, None).await;
                    }
                }
                SessionState::Stopped | SessionState::Failed => {
                    let age = terminal_at
                        .map(|t| (now - t).to_std().unwrap_or_default())
                        .unwrap_or_default();
                    if age >= self.config.route_retention_window {
                        debug!("reaper: garbage-collecting terminal session {}", id);
                        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
                        slots.remove(&id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Stop every live session. Used on hub shutdown.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Arc<SessionSlot>> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };

        info!("shutting down {} session(s)", slots.len());
        for slot in slots {
            self.shutdown_slot(&slot, SessionState::Stopped, None).await;
        }
    }

    /// The shared shutdown path: remove the route, terminate the kernel, move
    /// the session to its terminal state. Explicit stops, idle timeouts,
    /// reaper-detected deaths, and hub shutdown all converge here, and the
    /// route always disappears before `terminate` is invoked.
    async fn shutdown_slot(
        &self,
        slot: &Arc<SessionSlot>,
        final_state: SessionState,
        error: Option<String>,
    ) -> Session {
        let _guard = slot.op_lock.lock().await;

        let (id, prefix, handle) = {
            let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
            if data.session.is_terminal() {
                // Lost the race against another shutdown; exactly one
                // transition was observed.
                return data.snapshot();
            }
            data.session.state = SessionState::Stopping;
            (
                data.session.id.clone(),
                data.session.route_prefix.clone(),
                data.handle.take(),
            )
        };

        self.routes.remove(&prefix);

        if let Some(handle) = handle {
            match self.launcher.terminate(&handle).await {
                TerminationResult::Graceful => {
                    info!("session {} kernel terminated gracefully", id)
                }
                TerminationResult::Forced => {
                    warn!("session {} kernel required a forced kill", id)
                }
            }
        }

        let mut data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
        data.session.state = final_state;
        data.session.error_message = error;
        data.session.stopped_at = Some(Utc::now().to_rfc3339());
        data.terminal_at = Some(Utc::now());
        info!("session {} is {}", id, final_state);
        data.snapshot()
    }

    fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(session_id).cloned()
    }

    fn slot_by_prefix(&self, prefix: &str) -> Option<Arc<SessionSlot>> {
        // After stop-then-restart of the same owner/name, a terminal session
        // inside the retention window shares the prefix with the live one.
        // Only the live slot owns the route.
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .find(|slot| {
                let data = slot.data.lock().unwrap_or_else(|e| e.into_inner());
                data.session.route_prefix == prefix && data.session.is_active()
            })
            .cloned()
    }
}

fn validate_name(name: &str) -> Result<(), HubError> {
    if name.is_empty() {
        return Err(HubError::InvalidName("name must not be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(HubError::InvalidName(format!(
            "name too long ({} > 63 chars)",
            name.len()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HubError::InvalidName(format!(
            "name may only contain alphanumerics, '-' and '_': {}",
            name
        )));
    }
    Ok(())
}
