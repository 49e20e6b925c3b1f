// api-session - authenticated HTTP client library

pub mod auth;
pub mod config;
pub mod error;
pub mod geocoding;
pub mod http_client;
pub mod models;

pub use auth::{Credentials, Navigator, TokenStore};
pub use error::{ApiError, RefreshError};
pub use http_client::{ApiClient, ClientSettings};
pub use models::{ApiResponse, Payload, RequestBody, RequestOptions};
