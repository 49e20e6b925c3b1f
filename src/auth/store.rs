// Credential store
// Holds the access/refresh token pair behind an async lock

use tokio::sync::RwLock;

use super::types::{Credentials, TokenUpdate};

/// Shared token holder.
/// Empty strings are stored as absent so `is_authenticated` cannot diverge from token presence.
#[derive(Debug, Default)]
pub struct TokenStore {
    credentials: RwLock<Credentials>,
}

impl TokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a token pair
    pub fn with_tokens(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            credentials: RwLock::new(Credentials {
                access_token: normalize(access_token),
                refresh_token: normalize(refresh_token),
            }),
        }
    }

    /// Current snapshot
    pub async fn get(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.credentials.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.credentials.read().await.refresh_token.clone()
    }

    pub async fn set_access(&self, token: Option<String>) {
        self.credentials.write().await.access_token = normalize(token);
    }

    pub async fn set_refresh(&self, token: Option<String>) {
        self.credentials.write().await.refresh_token = normalize(token);
    }

    /// Apply a bulk update, leaving absent fields untouched
    pub async fn set_tokens(&self, update: TokenUpdate) {
        let mut creds = self.credentials.write().await;
        if let Some(access) = update.access_token {
            creds.access_token = normalize(access);
        }
        if let Some(refresh) = update.refresh_token {
            creds.refresh_token = normalize(refresh);
        }
    }

    /// Empty both tokens. Idempotent.
    pub async fn clear(&self) {
        let mut creds = self.credentials.write().await;
        creds.access_token = None;
        creds.refresh_token = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_authenticated()
    }
}

fn normalize(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}
