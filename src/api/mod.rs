//! HTTP API: session management endpoints and the kernel reverse proxy.

pub mod error;
pub mod handlers;
pub mod proxy;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
