//! Test utilities and common setup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::sync::mpsc;

use kernelhub::api::{self, AppState};
use kernelhub::credentials::{AuthLayerState, TokenRecord, TokenStore};
use kernelhub::hub::{HubConfig, HubService};
use kernelhub::kernel::{
    KernelHandle, KernelLauncher, KernelSpec, SpawnError, TerminationResult,
};
use kernelhub::routing::RouteTable;

pub const ALICE_TOKEN: &str = "alice-secret-token";
pub const BOB_TOKEN: &str = "bob-secret-token";
pub const REVOKED_TOKEN: &str = "carol-revoked-token";

/// In-memory launcher standing in for real kernel processes.
#[derive(Default)]
pub struct MockLauncher {
    fail_spawns: Mutex<bool>,
    alive: Mutex<HashMap<String, bool>>,
    spawn_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    next_port: AtomicU16,
}

impl MockLauncher {
    pub fn fail_next_spawns(&self) {
        *self.fail_spawns.lock().unwrap() = true;
    }

    pub fn kill_all(&self) {
        for alive in self.alive.lock().unwrap().values_mut() {
            *alive = false;
        }
    }

    pub fn spawns(&self) -> usize {
        self.spawn_calls.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KernelLauncher for MockLauncher {
    async fn spawn(&self, spec: &KernelSpec) -> Result<KernelHandle, SpawnError> {
        self.spawn_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_spawns.lock().unwrap() {
            return Err(SpawnError::Timeout(Duration::from_millis(10)));
        }
        // Addresses point at unbound local ports; proxied requests to them
        // fail with a connect error, which is what a crashed kernel looks
        // like to the gateway.
        let port = 39000 + self.next_port.fetch_add(1, Ordering::SeqCst);
        let handle = KernelHandle {
            id: format!("kernel-{}", spec.session_id),
            pid: None,
            address: ([127, 0, 0, 1], port).into(),
        };
        self.alive.lock().unwrap().insert(handle.id.clone(), true);
        Ok(handle)
    }

    async fn terminate(&self, handle: &KernelHandle) -> TerminationResult {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().unwrap().insert(handle.id.clone(), false);
        TerminationResult::Graceful
    }

    async fn is_alive(&self, handle: &KernelHandle) -> bool {
        *self.alive.lock().unwrap().get(&handle.id).unwrap_or(&false)
    }
}

/// A gateway wired to a mock launcher, plus handles to its internals.
pub struct TestGateway {
    pub app: Router,
    pub hub: Arc<HubService>,
    pub routes: Arc<RouteTable>,
    pub launcher: Arc<MockLauncher>,
    pub invalidations: mpsc::Receiver<String>,
}

fn token_store() -> TokenStore {
    TokenStore::from_records(vec![
        TokenRecord {
            token: ALICE_TOKEN.to_string(),
            user: "alice".to_string(),
            active: true,
        },
        TokenRecord {
            token: BOB_TOKEN.to_string(),
            user: "bob".to_string(),
            active: true,
        },
        TokenRecord {
            token: REVOKED_TOKEN.to_string(),
            user: "carol".to_string(),
            active: false,
        },
    ])
}

/// Create a test gateway with all services initialized.
pub fn test_gateway() -> TestGateway {
    test_gateway_with(HubConfig::default())
}

pub fn test_gateway_with(config: HubConfig) -> TestGateway {
    let launcher = Arc::new(MockLauncher::default());
    let routes = Arc::new(RouteTable::new());
    let hub = Arc::new(HubService::new(launcher.clone(), routes.clone(), config));
    let auth_state = AuthLayerState::new(token_store());

    let (invalidation_tx, invalidation_rx) = mpsc::channel(64);
    let state = AppState::new(hub.clone(), routes.clone(), auth_state, invalidation_tx);

    TestGateway {
        app: api::create_router(state),
        hub,
        routes,
        launcher,
        invalidations: invalidation_rx,
    }
}

/// Spawn a real HTTP backend that answers every request with `label`.
/// Stands in for a listening kernel behind the proxy.
pub async fn spawn_backend(label: &'static str) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move || async move { label });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
