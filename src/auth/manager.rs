use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::navigator::{Navigator, LOGIN_ROUTE};
use super::refresh;
use super::store::TokenStore;
use crate::error::RefreshError;

type PendingRefresh = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

/// Session manager
/// Owns the credential store and coordinates token refresh so that at most one
/// refresh call is in flight at a time
pub struct SessionManager {
    /// Shared token holder
    store: Arc<TokenStore>,

    /// Navigation capability, absent outside interactive environments
    navigator: Option<Arc<dyn Navigator>>,

    /// HTTP client for refresh requests
    client: Client,

    /// Absolute refresh endpoint
    refresh_url: String,

    /// Upper bound on one refresh call
    refresh_timeout: Option<Duration>,

    /// The single in-flight refresh, if any
    pending_refresh: Mutex<Option<PendingRefresh>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<TokenStore>,
        navigator: Option<Arc<dyn Navigator>>,
        client: Client,
        base_url: &str,
        refresh_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            navigator,
            client,
            refresh_url: format!("{}{}", base_url, refresh::REFRESH_PATH),
            refresh_timeout,
            pending_refresh: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// Whether a refresh is currently in flight
    pub async fn is_refreshing(&self) -> bool {
        self.pending_refresh.lock().await.is_some()
    }

    /// Recover from a 401 on a request that carried `sent_token`.
    ///
    /// When the store already holds a different access token the caller can
    /// replay straight away. Otherwise joins the refresh in flight or starts one.
    pub async fn refresh_after_unauthorized(
        self: &Arc<Self>,
        sent_token: Option<&str>,
    ) -> Result<(), RefreshError> {
        let pending = {
            let mut pending_refresh = self.pending_refresh.lock().await;

            let current = self.store.access_token().await;
            if current.is_some() && current.as_deref() != sent_token {
                tracing::debug!("Credentials changed since the request was sent, replaying");
                return Ok(());
            }

            if let Some(existing) = pending_refresh.clone() {
                tracing::debug!("Refresh already in flight, waiting for it");
                existing
            } else {
                let manager = Arc::clone(self);
                let refresh = async move {
                    let outcome = manager.perform_refresh().await;

                    // Reset the marker exactly once, whichever caller drove the refresh
                    *manager.pending_refresh.lock().await = None;

                    outcome
                }
                .boxed()
                .shared();

                *pending_refresh = Some(refresh.clone());
                refresh
            }
        };

        pending.await
    }

    async fn perform_refresh(&self) -> Result<(), RefreshError> {
        let Some(refresh_token) = self.store.refresh_token().await else {
            tracing::warn!("No refresh token held, ending session");
            self.redirect_to_login().await;
            return Err(RefreshError::MissingRefreshToken);
        };

        let call = refresh::request_refresh(&self.client, &self.refresh_url, &refresh_token);
        let result = match self.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(RefreshError::TimedOut)),
            None => call.await,
        };

        match result {
            Ok(token_data) => {
                self.store.set_access(Some(token_data.access_token)).await;

                // Rotation is optional: keep the current refresh token unless a new one arrived
                let rotated = token_data.refresh_token.is_some();
                if let Some(new_refresh_token) = token_data.refresh_token {
                    self.store.set_refresh(Some(new_refresh_token)).await;
                }

                tracing::info!(rotated, "Access token refreshed");
                Ok(())
            }
            Err(e) if e.is_unrecoverable() => {
                tracing::warn!(error = %e, "Token refresh failed, ending session");
                self.redirect_to_login().await;
                Err(e)
            }
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed, keeping credentials");
                Err(e)
            }
        }
    }

    /// Clear credentials, then move to the login view when a navigator is installed.
    /// Navigation failures are logged and swallowed; the credentials are already gone.
    pub async fn redirect_to_login(&self) {
        self.store.clear().await;

        let Some(navigator) = &self.navigator else {
            tracing::debug!("No navigator installed, skipping redirect");
            return;
        };

        if let Err(e) = navigator.replace(LOGIN_ROUTE) {
            tracing::error!(error = %e, route = LOGIN_ROUTE, "Navigation to login failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNavigator {
        routes: StdMutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn replace(&self, route: &str) -> anyhow::Result<()> {
            self.routes.lock().unwrap().push(route.to_string());
            Ok(())
        }
    }

    struct FailingNavigator;

    impl Navigator for FailingNavigator {
        fn replace(&self, _route: &str) -> anyhow::Result<()> {
            anyhow::bail!("router unavailable")
        }
    }

    fn manager_with(
        store: Arc<TokenStore>,
        navigator: Option<Arc<dyn Navigator>>,
        base_url: &str,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            store,
            navigator,
            Client::new(),
            base_url,
            Some(Duration::from_secs(5)),
        ))
    }

    #[tokio::test]
    async fn test_refresh_url_joins_base() {
        let manager = manager_with(Arc::new(TokenStore::new()), None, "https://api.example.org");
        assert_eq!(
            manager.refresh_url(),
            "https://api.example.org/api/admin/refresh"
        );

        let manager = manager_with(Arc::new(TokenStore::new()), None, "");
        assert_eq!(manager.refresh_url(), "/api/admin/refresh");
    }

    #[tokio::test]
    async fn test_redirect_clears_and_navigates() {
        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let navigator = Arc::new(RecordingNavigator::default());
        let manager = manager_with(store.clone(), Some(navigator.clone()), "");

        manager.redirect_to_login().await;

        assert!(store.get().await.is_empty());
        assert_eq!(*navigator.routes.lock().unwrap(), vec![LOGIN_ROUTE.to_string()]);
    }

    #[tokio::test]
    async fn test_redirect_swallows_navigation_failure() {
        let store = Arc::new(TokenStore::with_tokens(Some("A1".to_string()), None));
        let manager = manager_with(store.clone(), Some(Arc::new(FailingNavigator)), "");

        manager.redirect_to_login().await;

        assert!(store.get().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_logs_out_without_network() {
        let store = Arc::new(TokenStore::with_tokens(Some("A1".to_string()), None));
        let navigator = Arc::new(RecordingNavigator::default());
        // Unroutable base: any network attempt would surface as a transport error
        let manager = manager_with(store.clone(), Some(navigator.clone()), "http://127.0.0.1:9");

        let err = manager
            .refresh_after_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert_eq!(err, RefreshError::MissingRefreshToken);
        assert!(store.get().await.is_empty());
        assert_eq!(navigator.routes.lock().unwrap().len(), 1);
        assert!(!manager.is_refreshing().await);
    }

    #[tokio::test]
    async fn test_stale_token_replays_without_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/admin/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "A2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let manager = manager_with(store.clone(), None, &server.url());

        manager.refresh_after_unauthorized(Some("A1")).await.unwrap();

        // A 401 for a request that still carried A1 goes straight to replay
        manager.refresh_after_unauthorized(Some("A1")).await.unwrap();

        assert_eq!(store.access_token().await.as_deref(), Some("A2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_current_token_refreshes_again() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/admin/refresh")
            .match_header("authorization", "Bearer R1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "A2"}"#)
            .expect(2)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let manager = manager_with(store.clone(), None, &server.url());

        manager.refresh_after_unauthorized(Some("A1")).await.unwrap();
        manager.refresh_after_unauthorized(Some("A2")).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_caller_after_failed_refresh_finds_session_ended() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/admin/refresh")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let navigator = Arc::new(RecordingNavigator::default());
        let manager = manager_with(store.clone(), Some(navigator.clone()), &server.url());

        let first = manager.refresh_after_unauthorized(Some("A1")).await.unwrap_err();
        let late = manager.refresh_after_unauthorized(Some("A1")).await.unwrap_err();

        assert_eq!(first, RefreshError::Rejected { status: 401 });
        assert_eq!(late, RefreshError::MissingRefreshToken);
        assert_eq!(navigator.routes.lock().unwrap().len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_timeout_keeps_credentials() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        // Accept connections and never answer
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let navigator = Arc::new(RecordingNavigator::default());
        let manager = Arc::new(SessionManager::new(
            store.clone(),
            Some(navigator.clone()),
            Client::new(),
            &base_url,
            Some(Duration::from_millis(200)),
        ));

        let err = manager
            .refresh_after_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert_eq!(err, RefreshError::TimedOut);
        assert_eq!(store.access_token().await.as_deref(), Some("A1"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R1"));
        assert!(navigator.routes.lock().unwrap().is_empty());
        assert!(!manager.is_refreshing().await);

        silent.abort();
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_credentials() {
        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let manager = manager_with(store.clone(), None, "http://127.0.0.1:9");

        let err = manager
            .refresh_after_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshError::Transport(_)));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R1"));
        assert!(!manager.is_refreshing().await);
    }

    #[tokio::test]
    async fn test_successful_refresh_rotates_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/admin/refresh")
            .match_header("authorization", "Bearer R1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "A2", "refresh_token": "R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let manager = manager_with(store.clone(), None, &server.url());

        manager.refresh_after_unauthorized(Some("A1")).await.unwrap();

        assert_eq!(store.access_token().await.as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R2"));
        assert!(!manager.is_refreshing().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/admin/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "A2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(TokenStore::with_tokens(
            Some("A1".to_string()),
            Some("R1".to_string()),
        ));
        let manager = manager_with(store.clone(), None, &server.url());

        let results = futures::future::join_all(
            (0..5).map(|_| manager.refresh_after_unauthorized(Some("A1"))),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(store.access_token().await.as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R1"));
        mock.assert_async().await;
    }
}
