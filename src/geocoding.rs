// Geocoding pass-through
// Single lookup against a Nominatim-compatible search endpoint

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ApiError, Result};

pub const DEFAULT_GEOCODER_BASE: &str = "https://nominatim.oklabflensburg.de";

/// One search hit; Nominatim reports coordinates as strings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Coordinates {
    pub lat: String,
    pub lon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Coordinates {
    pub fn latitude(&self) -> Option<f64> {
        self.lat.parse().ok()
    }

    pub fn longitude(&self) -> Option<f64> {
        self.lon.parse().ok()
    }
}

pub struct Geocoder {
    client: Client,
    base_url: String,
}

impl Geocoder {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create geocoding HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a free-form address to the first matching coordinate.
    /// An empty result set is `Ok(None)`; transport errors and non-2xx statuses propagate.
    pub async fn resolve_address(&self, query: &str, limit: u32) -> Result<Option<Coordinates>> {
        let url = format!("{}/search", self.base_url);
        let limit = limit.to_string();

        tracing::debug!(url = %url, query = %query, limit = %limit, "Sending geocoding request");

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("limit", limit.as_str()), ("format", "jsonv2")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Geocoding request failed");
            return Err(ApiError::Geocoding {
                status: status.as_u16(),
            });
        }

        let results: Value = response.json().await?;
        let first = match results {
            Value::Array(items) => items.into_iter().next(),
            _ => None,
        };

        match first {
            Some(item) => Ok(Some(serde_json::from_value(item)?)),
            None => {
                tracing::debug!(query = %query, "Geocoding returned no results");
                Ok(None)
            }
        }
    }
}
