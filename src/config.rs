use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use std::time::Duration;

use crate::geocoding::DEFAULT_GEOCODER_BASE;
use crate::http_client::ClientSettings;

/// Authenticated API client with transparent token refresh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base API address (empty means paths are absolute URLs)
    #[arg(short = 'b', long, env = "API_BASE", default_value = "")]
    pub api_base: String,

    /// Geocoding service base address
    #[arg(long, env = "GEOCODER_BASE", default_value = DEFAULT_GEOCODER_BASE)]
    pub geocoder_base: String,

    /// Initial access token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Initial refresh token
    #[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Log in with this account before running the command
    #[arg(short = 'u', long, env = "LOGIN_EMAIL")]
    pub email: Option<String>,

    /// Password for --email (prompted when omitted)
    #[arg(long, env = "LOGIN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Token refresh timeout in seconds (0 disables)
    #[arg(long, env = "REFRESH_TIMEOUT", default_value = "30")]
    pub refresh_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Perform one authenticated request and print the result
    Fetch {
        /// Path appended to the base address
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body; sent as JSON when it parses, as text otherwise
        #[arg(short = 'd', long)]
        data: Option<String>,
    },

    /// Resolve an address to coordinates
    Geocode {
        /// Free-form address
        query: String,

        /// Maximum number of results requested from the service
        #[arg(short, long, default_value = "1")]
        limit: u32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Endpoints
    pub api_base: String,
    pub geocoder_base: String,

    // Credentials
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub login_email: Option<String>,
    pub login_password: Option<String>,

    // Timeouts
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub refresh_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    pub fn from_args(args: CliArgs) -> Self {
        Config {
            api_base: args.api_base,
            geocoder_base: args.geocoder_base,

            access_token: args.access_token,
            refresh_token: args.refresh_token,
            login_email: args.email,
            login_password: args.password,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            http_request_timeout: args.http_timeout,
            refresh_timeout: args.refresh_timeout,

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),

            command: args.command,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_base(&self.api_base, "API_BASE")?;
        validate_base(&self.geocoder_base, "GEOCODER_BASE")?;

        if self.geocoder_base.is_empty() {
            anyhow::bail!("GEOCODER_BASE cannot be empty");
        }

        if let Command::Fetch {
            method, headers, ..
        } = &self.command
        {
            parse_method(method)?;
            for header in headers {
                parse_header(header)?;
            }
        }

        Ok(())
    }

    /// Settings for the authenticated client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api_base.clone(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            refresh_timeout: match self.refresh_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

fn validate_base(value: &str, name: &str) -> Result<()> {
    if value.is_empty() || value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    anyhow::bail!("{} must be empty or an http(s) URL: {}", name, value)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Parse an HTTP method name, case-insensitively
pub fn parse_method(s: &str) -> Result<Method> {
    Method::from_bytes(s.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", s))
}

/// Parse a `Name: value` header argument
pub fn parse_header(s: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = s
        .split_once(':')
        .with_context(|| format!("Header must look like 'Name: value': {}", s))?;

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name: {}", name.trim()))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid value for header {}", name))?;

    Ok((name, value))
}
