//! Credential store and bearer-token authentication.
//!
//! Tokens are opaque strings loaded once at startup from a TOML token store.
//! Every request to the gateway presents one as a bearer token.

mod error;
mod middleware;
mod store;

pub use error::AuthError;
pub use middleware::{AuthLayerState, CurrentUser, auth_middleware};
pub use store::{TokenRecord, TokenStore, User};
