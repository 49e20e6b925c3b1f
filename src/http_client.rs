use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{LoginRequest, LoginResponse, Navigator, SessionManager, TokenStore, TokenUpdate};
use crate::error::{ApiError, Result};
use crate::models::request::build_form;
use crate::models::response::read_payload;
use crate::models::{ApiResponse, Payload, RequestBody, RequestOptions};

/// Login endpoint, relative to the API base address
pub const LOGIN_PATH: &str = "/api/admin/login";

/// Connection settings for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base API address; empty means paths are used as-is
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Upper bound on one refresh call, `None` waits indefinitely
    pub refresh_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            refresh_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Authenticated HTTP client.
///
/// Attaches the stored access token to every request and, on a 401 from an
/// eligible endpoint, refreshes the token once (shared with every concurrent
/// caller) and replays the request. Cloning is cheap; clones share the
/// credential store and the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base API address
    base_url: String,

    /// Credential owner and refresh coordinator
    session: Arc<SessionManager>,
}

impl ApiClient {
    /// Create a new client
    pub fn new(
        settings: ClientSettings,
        store: Arc<TokenStore>,
        navigator: Option<Arc<dyn Navigator>>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let session = Arc::new(SessionManager::new(
            store,
            navigator,
            client.clone(),
            &base_url,
            settings.refresh_timeout,
        ));

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    /// Client with default timeouts and no navigator
    pub fn with_base_url(base_url: impl Into<String>, store: Arc<TokenStore>) -> anyhow::Result<Self> {
        Self::new(
            ClientSettings {
                base_url: base_url.into(),
                ..ClientSettings::default()
            },
            store,
            None,
        )
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        self.session.store()
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one logical exchange.
    ///
    /// A 401 from an eligible endpoint triggers a single shared refresh and one
    /// replay with whatever credential is stored afterwards. Refresh failures are
    /// returned as [`ApiError::Refresh`] and no replay happens.
    pub async fn execute(&self, path: &str, options: RequestOptions) -> Result<ApiResponse<Payload>> {
        let url = self.resolve(path);

        let token = self.store().access_token().await;

        match self.send(&url, &options, token.as_deref()).await {
            Err(err) if err.is_unauthorized() && is_refresh_eligible(&url) => {
                tracing::warn!(url = %url, "Received 401, refreshing access token");

                self.session.refresh_after_unauthorized(token.as_deref()).await?;

                let token = self.store().access_token().await;
                tracing::debug!(url = %url, "Replaying request with refreshed credentials");
                self.send(&url, &options, token.as_deref()).await
            }
            other => other,
        }
    }

    /// Perform an exchange and decode the payload into `T`
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        let response = self.execute(path, options).await?;
        let data = serde_json::from_value(response.data.into_json())?;
        Ok(ApiResponse {
            data,
            status: response.status,
        })
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse<Payload>> {
        self.execute(path, RequestOptions::get()).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<ApiResponse<Payload>> {
        self.execute(path, RequestOptions::post().json(body)).await
    }

    pub async fn put_json(&self, path: &str, body: Value) -> Result<ApiResponse<Payload>> {
        self.execute(path, RequestOptions::put().json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse<Payload>> {
        self.execute(path, RequestOptions::delete()).await
    }

    /// Log in and store the returned token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = serde_json::to_value(LoginRequest { email, password })?;
        let response: ApiResponse<LoginResponse> = self
            .execute_as(LOGIN_PATH, RequestOptions::post().json(body))
            .await?;

        let login = response.data;
        self.store()
            .set_tokens(TokenUpdate {
                access_token: login.access_token.clone().map(Some),
                refresh_token: login.refresh_token.clone().map(Some),
            })
            .await;

        tracing::info!(
            authenticated = self.store().is_authenticated().await,
            "Login completed"
        );
        Ok(login)
    }

    /// Explicit logout: clear credentials and redirect
    pub async fn logout(&self) {
        tracing::info!("Logging out");
        self.session.redirect_to_login().await;
    }

    fn resolve(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build a fresh request descriptor, send it and classify the response
    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        access_token: Option<&str>,
    ) -> Result<ApiResponse<Payload>> {
        let headers = build_headers(&options.headers, &options.body, access_token)?;

        let mut request = self
            .client
            .request(options.method.clone(), url)
            .headers(headers);

        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.body(value.to_string()),
            RequestBody::Text(text) => request.body(text.clone()),
            RequestBody::Bytes(data) => request.body(data.clone()),
            RequestBody::Multipart(parts) => request.multipart(build_form(parts)?),
        };

        tracing::debug!(
            method = %options.method,
            url = %url,
            authenticated = access_token.is_some(),
            "Sending HTTP request"
        );

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, url = %url, "HTTP request error");
            ApiError::Transport(e)
        })?;

        let status = response.status();
        let data = read_payload(response).await;

        if status.is_success() {
            tracing::debug!(status = %status, "Request successful");
            return Ok(ApiResponse {
                data,
                status: status.as_u16(),
            });
        }

        let message = failure_message(status, &data);
        tracing::warn!(
            status = status.as_u16(),
            url = %url,
            message = %message,
            "HTTP request failed with error response"
        );

        Err(ApiError::Status {
            status: status.as_u16(),
            message,
            body: data,
        })
    }
}

/// Refresh-and-retry is never attempted against the refresh or login endpoints
pub fn is_refresh_eligible(url: &str) -> bool {
    !url.contains("/refresh") && !url.contains("/login")
}

/// Merge caller headers with the content-type default and the bearer credential
pub(crate) fn build_headers(
    caller: &HeaderMap,
    body: &RequestBody,
    access_token: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = caller.clone();

    if !body.is_multipart() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    match access_token {
        Some(token) => {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Access token is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        None => {
            headers.remove(AUTHORIZATION);
        }
    }

    Ok(headers)
}

/// Structured `error` field if present, otherwise the standard status phrase
fn failure_message(status: StatusCode, data: &Payload) -> String {
    data.error_message()
        .map(str::to_owned)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FormPart;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_refresh_eligibility() {
        assert!(is_refresh_eligible("https://api.example.org/api/sites"));
        assert!(!is_refresh_eligible("https://api.example.org/api/admin/refresh"));
        assert!(!is_refresh_eligible("https://api.example.org/api/admin/login"));
        assert!(!is_refresh_eligible("/api/admin/login?next=/app"));
    }

    #[test]
    fn test_headers_default_content_type() {
        let headers = build_headers(&HeaderMap::new(), &RequestBody::Empty, None).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_headers_keep_caller_content_type() {
        let mut caller = HeaderMap::new();
        caller.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        caller.insert("x-trace", HeaderValue::from_static("abc"));

        let headers = build_headers(&caller, &RequestBody::Text("a;b".to_string()), None).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/csv");
        assert_eq!(headers.get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_headers_multipart_has_no_default_content_type() {
        let body = RequestBody::Multipart(vec![FormPart::text("title", "Runestone")]);
        let headers = build_headers(&HeaderMap::new(), &body, Some("A1")).unwrap();
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer A1");
    }

    #[test]
    fn test_headers_strip_stale_authorization() {
        let mut caller = HeaderMap::new();
        caller.insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));

        let headers = build_headers(&caller, &RequestBody::Empty, None).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());

        let headers = build_headers(&caller, &RequestBody::Empty, Some("fresh")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer fresh");
    }

    #[test]
    fn test_headers_reject_invalid_token() {
        let err = build_headers(&HeaderMap::new(), &RequestBody::Empty, Some("bad\ntoken"));
        assert!(matches!(err, Err(ApiError::Internal(_))));
    }

    #[test]
    fn test_failure_message() {
        let data = Payload::Json(json!({"error": "Organizer not found"}));
        assert_eq!(
            failure_message(StatusCode::NOT_FOUND, &data),
            "Organizer not found"
        );
        assert_eq!(
            failure_message(StatusCode::UNAUTHORIZED, &Payload::Empty),
            "Unauthorized"
        );
        assert_eq!(
            failure_message(
                StatusCode::INTERNAL_SERVER_ERROR,
                &Payload::Text("boom".to_string())
            ),
            "Internal Server Error"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::with_base_url("https://api.example.org/", Arc::new(TokenStore::new()))
            .unwrap();
        assert_eq!(client.base_url(), "https://api.example.org");
        assert_eq!(
            client.resolve("/api/sites"),
            "https://api.example.org/api/sites"
        );
    }

    proptest! {
        #[test]
        fn prop_authorization_matches_token(token in "[A-Za-z0-9._~+/-]{1,64}") {
            let headers = build_headers(&HeaderMap::new(), &RequestBody::Empty, Some(&token)).unwrap();
            let expected = format!("Bearer {}", token);
            prop_assert_eq!(headers.get(AUTHORIZATION).unwrap().to_str().unwrap(), expected.as_str());
        }
    }
}
