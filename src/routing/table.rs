//! Shared prefix-to-backend routing table.

use std::collections::BTreeMap;
use std::sync::RwLock;

use log::debug;

/// Mapping from a routable path prefix to the network address of a live
/// kernel.
///
/// Readers (one per proxied request) take the read lock; the hub takes the
/// write lock on install/remove. Critical sections are await-free, so a
/// request never observes a partially-updated route: `put` for an existing
/// prefix replaces the old address in one write-locked step.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<String, String>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route, replacing any existing route for the same prefix.
    pub fn put(&self, prefix: impl Into<String>, address: impl Into<String>) {
        let prefix = prefix.into();
        let address = address.into();
        debug!("installing route {} -> {}", prefix, address);
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(prefix, address);
    }

    /// Remove a route. Returns whether a route existed; removing an absent
    /// prefix is a no-op.
    pub fn remove(&self, prefix: &str) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let existed = routes.remove(prefix).is_some();
        if existed {
            debug!("removed route {}", prefix);
        }
        existed
    }

    /// Resolve a request path to `(prefix, backend address)` by longest-prefix
    /// match. A prefix only matches at a path-segment boundary, so the route
    /// for `/users/a/s1` never captures traffic for `/users/a/s10`.
    pub fn resolve(&self, path: &str) -> Option<(String, String)> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());

        let mut best: Option<(&String, &String)> = None;
        for (prefix, address) in routes.iter() {
            if !prefix_matches(prefix, path) {
                continue;
            }
            if best.is_none_or(|(p, _)| prefix.len() > p.len()) {
                best = Some((prefix, address));
            }
        }

        best.map(|(prefix, address)| (prefix.clone(), address.clone()))
    }

    /// Whether a route is installed for the exact prefix.
    pub fn contains(&self, prefix: &str) -> bool {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.contains_key(prefix)
    }

    pub fn len(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    let rest = &path[prefix.len()..];
    rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')
}
