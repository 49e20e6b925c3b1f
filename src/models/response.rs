// Response-side types: classified payloads and the success envelope

use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use serde::Serialize;
use serde_json::Value;

/// Successful exchange: decoded payload plus the HTTP status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
}

/// Response body classified by its declared content type
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `application/json` body that parsed
    Json(Value),
    /// Any other content type, read as text
    Text(String),
    /// Body could not be read or parsed
    #[default]
    Empty,
}

impl Payload {
    /// Structured view of the payload, if it is JSON
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// Non-empty string `error` field of a JSON object payload
    pub fn error_message(&self) -> Option<&str> {
        self.as_json()?
            .get("error")
            .and_then(|v| v.as_str())
            .filter(|msg| !msg.is_empty())
    }

    /// Collapse into a JSON value (text becomes a string, empty becomes null)
    pub fn into_json(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
            Payload::Empty => Value::Null,
        }
    }
}

/// True when a content-type header value declares JSON
pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    content_type.contains("application/json")
}

/// Read a response body, degrading to `Payload::Empty` on any read or parse failure
pub(crate) async fn read_payload(response: Response) -> Payload {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_json_content_type)
        .unwrap_or(false);

    if is_json {
        match response.json::<Value>().await {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                tracing::debug!(error = %e, "JSON response body did not parse, treating as empty");
                Payload::Empty
            }
        }
    } else {
        match response.text().await {
            Ok(text) => Payload::Text(text),
            Err(e) => {
                tracing::debug!(error = %e, "Response body could not be read, treating as empty");
                Payload::Empty
            }
        }
    }
}
