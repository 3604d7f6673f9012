//! Application state shared across handlers.

use std::sync::Arc;

use axum::body::Body;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::mpsc;

use crate::credentials::AuthLayerState;
use crate::hub::HubService;
use crate::routing::RouteTable;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub orchestrator owning the session table.
    pub hub: Arc<HubService>,
    /// Route table consulted by the proxy.
    pub routes: Arc<RouteTable>,
    /// Authentication state for the bearer-token middleware.
    pub auth: AuthLayerState,
    /// HTTP client for proxying requests to kernels.
    pub http_client: Client<HttpConnector, Body>,
    /// Route-invalidation reports from the proxy to the reaper.
    pub invalidations: mpsc::Sender<String>,
}

impl AppState {
    pub fn new(
        hub: Arc<HubService>,
        routes: Arc<RouteTable>,
        auth: AuthLayerState,
        invalidations: mpsc::Sender<String>,
    ) -> Self {
        let http_client: Client<HttpConnector, Body> =
            Client::builder(TokioExecutor::new()).build_http();

        Self {
            hub,
            routes,
            auth,
            http_client,
            invalidations,
        }
    }
}
