// Error handling module
// Defines request-layer and refresh-protocol error types

use thiserror::Error;

use crate::models::Payload;

/// Errors surfaced by the authenticated request layer
#[derive(Error, Debug)]
pub enum ApiError {
    /// Network-level failure before a response was received
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success response returned to the caller
    #[error("{message} (status {status})")]
    Status {
        status: u16,
        message: String,
        body: Payload,
    },

    /// Token refresh did not produce usable credentials
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Payload could not be decoded into the requested type
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Geocoding service answered with a non-success status
    #[error("Geocoding request failed with status {status}")]
    Geocoding { status: u16 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status attached to the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Refresh(RefreshError::Rejected { status }) => Some(*status),
            ApiError::Geocoding { status } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for a 401 response surfaced to the caller
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

/// Outcome of a failed refresh, shared by every waiter of the same refresh
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Missing refresh token")]
    MissingRefreshToken,

    #[error("Refresh failed")]
    Rejected { status: u16 },

    #[error("Refresh response missing access token")]
    MalformedResponse,

    #[error("Refresh request could not be sent: {0}")]
    Transport(String),

    #[error("Refresh request timed out")]
    TimedOut,
}

impl RefreshError {
    /// Failures that end the session: credentials are cleared and a redirect is attempted
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            RefreshError::MissingRefreshToken
                | RefreshError::Rejected { .. }
                | RefreshError::MalformedResponse
        )
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
