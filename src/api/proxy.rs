//! Reverse proxy forwarding session traffic to kernels.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Uri},
    response::Response,
};
use log::{debug, error, warn};

use super::error::ApiError;
use super::state::AppState;

/// Proxy a request under `/users/...` to the kernel its route resolves to.
///
/// The full original path is forwarded to the kernel; bodies stream through
/// in both directions with hyper's flow control, no buffering here.
pub async fn proxy_kernel(
    State(state): State<AppState>,
    mut req: Request<Body>,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();

    let Some((prefix, address)) = state.routes.resolve(&path) else {
        debug!("no route for {}", path);
        return Err(ApiError::not_found(format!("no route for path: {}", path)));
    };

    // Proxied traffic counts as session activity for the idle timeout.
    state.hub.touch_route(&prefix);

    let query = req.uri().query().unwrap_or("");
    let mut target_uri = format!("http://{}{}", address, path);
    if !query.is_empty() {
        target_uri.push('?');
        target_uri.push_str(query);
    }

    debug!("proxying {} -> {}", path, target_uri);

    let uri: Uri = target_uri.parse().map_err(|e| {
        error!("invalid target URI {}: {:?}", target_uri, e);
        ApiError::internal(format!("invalid target URI: {}", target_uri))
    })?;
    *req.uri_mut() = uri;

    // Ensure Host header matches the target authority.
    if let Some(authority) = req.uri().authority() {
        let value = axum::http::HeaderValue::from_str(authority.as_str()).map_err(|e| {
            error!("invalid Host header value {}: {:?}", authority.as_str(), e);
            ApiError::internal("invalid Host header for target".to_string())
        })?;
        req.headers_mut().insert(axum::http::header::HOST, value);
    }

    let response = state.http_client.request(req).await.map_err(|e| {
        if e.is_connect() {
            // Stale route from a just-crashed kernel. Report it so the hub
            // can probe the kernel and drop the route without waiting for
            // the next reaper tick.
            warn!("upstream {} unreachable for {}: {:?}", address, prefix, e);
            if state.invalidations.try_send(prefix.clone()).is_err() {
                debug!("invalidation channel full, reaper will catch up");
            }
            ApiError::service_unavailable(format!("kernel at {} is unreachable", address))
        } else {
            error!("proxy request to {} failed: {:?}", address, e);
            ApiError::bad_gateway(format!("proxy request failed: {}", e))
        }
    })?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}
