use anyhow::{Context, Result};
use dialoguer::Password;
use std::sync::Arc;
use std::time::Duration;

use api_session::auth::{TerminalNavigator, TokenStore};
use api_session::config::{self, Command, Config, LogFormat};
use api_session::geocoding::Geocoder;
use api_session::{ApiClient, ApiError, RequestOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::debug!(
        api_base = %config.api_base,
        authenticated = config.access_token.is_some(),
        "Configuration loaded"
    );

    match config.command.clone() {
        Command::Fetch {
            path,
            method,
            headers,
            data,
        } => run_fetch(&config, &path, &method, &headers, data).await,
        Command::Geocode { query, limit } => run_geocode(&config, &query, limit).await,
    }
}

/// Initialize logging with the configured level; output goes to stderr
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run_fetch(
    config: &Config,
    path: &str,
    method: &str,
    headers: &[String],
    data: Option<String>,
) -> Result<()> {
    let store = Arc::new(TokenStore::with_tokens(
        config.access_token.clone(),
        config.refresh_token.clone(),
    ));
    let client = ApiClient::new(
        config.client_settings(),
        store,
        Some(Arc::new(TerminalNavigator)),
    )?;

    if let Some(email) = &config.login_email {
        let password = match &config.login_password {
            Some(password) => password.clone(),
            None => Password::new()
                .with_prompt(format!("Password for {}", email))
                .interact()
                .context("Failed to read password")?,
        };

        let login = client.login(email, &password).await.context("Login failed")?;
        tracing::info!(message = %login.message, "Logged in");
    }

    let mut options = RequestOptions::new(config::parse_method(method)?);
    for header in headers {
        let (name, value) = config::parse_header(header)?;
        options = options.header(name, value);
    }
    if let Some(data) = data {
        options = match serde_json::from_str(&data) {
            Ok(value) => options.json(value),
            Err(_) => options.text(data),
        };
    }

    match client.execute(path, options).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(ApiError::Status {
            status,
            message,
            body,
        }) => {
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            anyhow::bail!("Request failed with status {}: {}", status, message)
        }
        Err(e) => Err(e).context("Request failed"),
    }
}

async fn run_geocode(config: &Config, query: &str, limit: u32) -> Result<()> {
    let geocoder = Geocoder::new(
        config.geocoder_base.clone(),
        Duration::from_secs(config.http_request_timeout),
    )?;

    match geocoder
        .resolve_address(query, limit)
        .await
        .context("Geocoding failed")?
    {
        Some(coordinates) => println!("{}", serde_json::to_string_pretty(&coordinates)?),
        None => {
            tracing::info!(query = %query, "No match");
            println!("null");
        }
    }

    Ok(())
}
