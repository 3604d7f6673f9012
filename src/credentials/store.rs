//! Token store backing the credential check.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::error::AuthError;

/// An authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
}

/// One row of the token store file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRecord {
    /// The opaque token value presented by callers.
    pub token: String,
    /// The user the token belongs to.
    pub user: String,
    /// Inactive tokens are rejected with a distinct error.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TokenStoreFile {
    #[serde(default)]
    tokens: Vec<TokenRecord>,
}

/// Stored entry with the token value replaced by its digest.
#[derive(Debug, Clone)]
struct StoredToken {
    digest: [u8; 32],
    user: String,
    active: bool,
}

/// Immutable mapping from API tokens to user identities.
///
/// Loaded once at startup; an unreadable store aborts the process rather than
/// running with an empty trust boundary.
#[derive(Debug, Clone)]
pub struct TokenStore {
    entries: Vec<StoredToken>,
}

impl TokenStore {
    /// Load the token store from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading token store {}", path.display()))?;
        let file: TokenStoreFile = toml::from_str(&contents)
            .with_context(|| format!("parsing token store {}", path.display()))?;
        Ok(Self::from_records(file.tokens))
    }

    /// Build a store from in-memory records.
    pub fn from_records(records: Vec<TokenRecord>) -> Self {
        let entries = records
            .into_iter()
            .map(|record| StoredToken {
                digest: Sha256::digest(record.token.as_bytes()).into(),
                user: record.user,
                active: record.active,
            })
            .collect();
        Self { entries }
    }

    /// Number of loaded token records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Authenticate a presented token.
    ///
    /// The token is hashed and compared against every stored digest, so the
    /// cost does not depend on the token length or on which entry matches.
    /// No side effects.
    pub fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();

        let mut matched: Option<&StoredToken> = None;
        for entry in &self.entries {
            if ct_eq(&entry.digest, &digest) {
                matched = Some(entry);
            }
        }

        match matched {
            Some(entry) if entry.active => Ok(User {
                name: entry.user.clone(),
            }),
            Some(_) => Err(AuthError::Revoked),
            None => Err(AuthError::Unknown),
        }
    }
}

/// Constant-time equality over fixed-size digests.
fn ct_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
