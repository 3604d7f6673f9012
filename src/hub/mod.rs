//! Hub orchestrator: session table, state machine, and background reaper.
//!
//! Sessions move `Requested -> Starting -> Running -> Stopping -> Stopped`,
//! with `Failed` reachable from `Starting` (spawn error) or `Running` (kernel
//! died). A route exists exactly while its session is `Running`: it is
//! installed before `Running` is reported and removed before the kernel is
//! terminated.

mod models;
mod reaper;
mod service;

pub use models::{route_prefix, CreateSessionRequest, HubConfig, Session, SessionState};
pub use reaper::spawn_reaper;
pub use service::{HubError, HubService};
