//! Bearer-token middleware for the gateway API.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::debug;
use serde_json::json;

use super::error::AuthError;
use super::store::TokenStore;

/// Shared state for the auth middleware.
#[derive(Clone)]
pub struct AuthLayerState {
    store: Arc<TokenStore>,
}

impl AuthLayerState {
    pub fn new(store: TokenStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub name: String,
}

/// Validate the bearer token on a request and attach the caller identity.
///
/// Rejected requests never reach a handler, so an unauthenticated caller can
/// never trigger a kernel spawn.
pub async fn auth_middleware(
    State(state): State<AuthLayerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?;
    let header_str = header_value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let token = header_str
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?;

    let user = state.store.authenticate(token)?;
    debug!("authenticated request for user {}", user.name);

    req.extensions_mut().insert(CurrentUser { name: user.name });
    Ok(next.run(req).await)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
