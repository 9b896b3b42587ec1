// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interactive authorization and session setup.
//!
//! A session is valid once [`StravaService`] holds credentials whose
//! access token is unexpired (refreshing if needed). When there are no
//! credentials, or the refresh token is rejected, the user goes through
//! the authorization-code flow again, at most `max_attempts` times.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Credentials;
use crate::routes::callback;
use crate::services::strava::{StravaClient, StravaService};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Where the one-time authorization code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSource {
    /// Given on the command line
    Provided(String),
    /// Pasted by the user on stdin (the code or the whole redirect URL)
    Prompt,
    /// Caught by a local callback server on this port
    Loopback { port: u16 },
}

/// Settings for the authorization flow.
#[derive(Debug, Clone)]
pub struct AuthorizeOptions {
    pub redirect_uri: String,
    pub max_attempts: u32,
}

impl AuthorizeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            redirect_uri: config.strava.redirect_uri.clone(),
            max_attempts: config.sync.max_auth_attempts,
        }
    }

    /// Redirect URI for a callback server on `port`.
    pub fn loopback_redirect_uri(&self, port: u16) -> String {
        format!("{}:{}/callback", self.redirect_uri.trim_end_matches('/'), port)
    }
}

/// Random CSRF state for the authorization URL.
pub fn new_state() -> Result<String> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failed")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Accept either a bare code or a pasted redirect URL.
pub fn code_from_input(input: &str) -> Option<String> {
    let input = input.trim();
    let code = match input.find("code=") {
        Some(start) => {
            let rest = &input[start + "code=".len()..];
            rest.split('&').next().unwrap_or_default()
        }
        None => input,
    };
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

/// Get an authorization code from `source`.
pub async fn obtain_code(
    client: &StravaClient,
    options: &AuthorizeOptions,
    source: &CodeSource,
) -> Result<String> {
    match source {
        CodeSource::Provided(code) => Ok(code.clone()),
        CodeSource::Prompt => {
            let state = new_state()?;
            let url = client.authorization_url(&options.redirect_uri, &state);
            println!("Please authorize this application to access your Strava data:");
            println!("1. Open this URL in your browser:\n   {}", url);
            println!("2. Authorize the app and copy the 'code' from the redirected URL.");
            println!("3. Paste the authorization code (or the whole URL) here:");

            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to read stdin: {}", e)))?;
            code_from_input(&line).ok_or_else(|| {
                AppError::Authorization("no authorization code was entered".to_string())
            })
        }
        CodeSource::Loopback { port } => {
            let listener = callback::bind(*port).await?;
            let port = listener
                .local_addr()
                .map(|a| a.port())
                .unwrap_or(*port);
            let state = new_state()?;
            let url = client.authorization_url(&options.loopback_redirect_uri(port), &state);
            println!("Open this URL in your browser to authorize strava-sync:\n   {}", url);
            callback::wait_for_code(listener, &state).await
        }
    }
}

/// Run the authorization-code flow, retrying rejected codes.
///
/// A code given on the command line is only tried once.
pub async fn authorize_interactive(
    service: &StravaService,
    options: &AuthorizeOptions,
    source: &CodeSource,
) -> Result<Credentials> {
    let max_attempts = match source {
        CodeSource::Provided(_) => 1,
        _ => options.max_attempts.max(1),
    };

    let mut last_error = None;
    for attempt in 1..=max_attempts {
        let result = match obtain_code(service.client(), options, source).await {
            Ok(code) => service.authorize(&code).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(credentials) => return Ok(credentials),
            Err(e) if e.is_authorization_error() => {
                tracing::warn!(attempt, max_attempts, error = %e, "Authorization attempt failed");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(AppError::Authorization(format!(
        "exceeded maximum of {} authorization attempts ({})",
        max_attempts, reason
    )))
}

/// Make sure `service` holds a usable access token.
pub async fn establish_session(
    service: &StravaService,
    options: &AuthorizeOptions,
    source: &CodeSource,
) -> Result<()> {
    let state = service.auth_state().await;
    tracing::info!(state = %state, "Checking Strava session");

    if service.credentials().await.is_some() {
        match service.ensure_valid_token().await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_authorization_error() => {
                tracing::warn!(error = %e, "Stored credentials unusable, re-authorizing");
            }
            Err(e) => return Err(e),
        }
    }

    authorize_interactive(service, options, source).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_random_and_url_safe() {
        let a = new_state().unwrap();
        let b = new_state().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_code_from_input() {
        assert_eq!(code_from_input("  abc123\n").as_deref(), Some("abc123"));
        assert_eq!(
            code_from_input("http://localhost/?state=&code=abc123&scope=read,activity:read_all")
                .as_deref(),
            Some("abc123")
        );
        assert_eq!(code_from_input("\n"), None);
        assert_eq!(code_from_input("http://localhost/?code=&scope=read"), None);
    }

    #[test]
    fn test_loopback_redirect_uri() {
        let options = AuthorizeOptions {
            redirect_uri: "http://localhost/".to_string(),
            max_attempts: 3,
        };
        assert_eq!(
            options.loopback_redirect_uri(8765),
            "http://localhost:8765/callback"
        );
    }
}
