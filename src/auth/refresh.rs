// Token refresh call

use reqwest::Client;

use super::types::{RefreshResponse, TokenData};
use crate::error::RefreshError;

/// Refresh endpoint, relative to the API base address
pub const REFRESH_PATH: &str = "/api/admin/refresh";

/// Exchange a refresh token for a new access token.
/// The refresh token travels as the bearer credential; no body is sent.
pub async fn request_refresh(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<TokenData, RefreshError> {
    tracing::debug!(url = %url, "Requesting access token refresh");

    let response = client
        .post(url)
        .bearer_auth(refresh_token)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, url = %url, "Refresh request could not be sent");
            RefreshError::Transport(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            response_body = %error_text,
            "Refresh endpoint rejected the refresh token"
        );
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
        });
    }

    let data: RefreshResponse = response.json().await.map_err(|e| {
        tracing::warn!(error = %e, "Refresh response did not parse");
        RefreshError::MalformedResponse
    })?;

    let access_token = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or(RefreshError::MalformedResponse)?;

    Ok(TokenData {
        access_token,
        refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
    })
}
