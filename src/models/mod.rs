// Data models for outbound requests and classified responses

pub mod request;
pub mod response;

pub use request::{FormPart, FormValue, RequestBody, RequestOptions};
pub use response::{ApiResponse, Payload};
