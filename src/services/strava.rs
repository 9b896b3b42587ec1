// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for listing activities and fetching streams.
//!
//! Handles:
//! - OAuth authorization-code exchange and token refresh
//! - Paginated activity listing
//! - Per-activity stream fetching
//! - 401/429 classification (see [`crate::services::retry`])

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ActivitySummary, AuthState, Credentials, MetricSet, StreamRecord};
use crate::services::retry::{CallOutcome, RetryPolicy};
use crate::store::TokenStore;
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use tokio::sync::Mutex;

pub const DEFAULT_API_BASE_URL: &str = "https://www.strava.com/api/v3";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://www.strava.com/oauth";

/// Which kind of endpoint a response came from; decides how 4xx map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Api,
    Token,
}

/// Low-level Strava API client. Stateless apart from the HTTP pool.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
            oauth_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            client_id,
            client_secret,
            scope: "profile:read_all,activity:read_all".to_string(),
        }
    }

    /// Point the client at other hosts (tests, proxies).
    pub fn with_base_urls(mut self, api_base_url: &str, oauth_base_url: &str) -> Self {
        self.base_url = api_base_url.trim_end_matches('/').to_string();
        self.oauth_url = oauth_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// URL the user opens to grant access.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}\
             &approval_prompt=force&scope={}&state={}",
            self.oauth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state)
        )
    }

    /// Exchange a one-time authorization code for the first credentials.
    pub async fn exchange_code(&self, code: &str) -> CallOutcome<Credentials> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await;

        classify(response, Endpoint::Token, "authorization code").await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> CallOutcome<Credentials> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await;

        classify(response, Endpoint::Token, "refresh token").await
    }

    /// One page of the athlete's activities, most recent first.
    pub async fn list_activities(
        &self,
        access_token: &str,
        page: u32,
        per_page: u32,
    ) -> CallOutcome<Vec<ActivitySummary>> {
        tracing::debug!(page, per_page, "Fetching activity page");
        let response = self
            .http
            .get(format!("{}/athlete/activities", self.base_url))
            .bearer_auth(access_token)
            .query(&[("page", page.to_string()), ("per_page", per_page.to_string())])
            .send()
            .await;

        classify(response, Endpoint::Api, "activity list").await
    }

    /// Streams for one activity, keyed by type.
    ///
    /// `keys` is the comma-separated metric list.
    pub async fn get_streams(
        &self,
        access_token: &str,
        activity_id: u64,
        keys: &str,
    ) -> CallOutcome<StreamRecord> {
        tracing::debug!(activity_id, keys, "Fetching activity streams");
        let response = self
            .http
            .get(format!("{}/activities/{}/streams", self.base_url, activity_id))
            .bearer_auth(access_token)
            .query(&[("keys", keys), ("key_by_type", "true")])
            .send()
            .await;

        let what = format!("streams for activity {}", activity_id);
        match classify::<Value>(response, Endpoint::Api, &what).await {
            CallOutcome::Ok(body) => parse_streams(activity_id, body),
            CallOutcome::NeedsReauth(r) => CallOutcome::NeedsReauth(r),
            CallOutcome::RateLimited { retry_after } => CallOutcome::RateLimited { retry_after },
            CallOutcome::NotFound(w) => CallOutcome::NotFound(w),
            CallOutcome::Fatal(e) => CallOutcome::Fatal(e),
        }
    }
}

/// Map an HTTP response onto a [`CallOutcome`].
async fn classify<T: DeserializeOwned>(
    response: reqwest::Result<reqwest::Response>,
    endpoint: Endpoint,
    what: &str,
) -> CallOutcome<T> {
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            return CallOutcome::Fatal(AppError::StravaApi(format!(
                "Request for {} failed: {}",
                what, e
            )))
        }
    };

    let status = response.status();
    if status.is_success() {
        return match response.json::<T>().await {
            Ok(body) => CallOutcome::Ok(body),
            Err(e) => CallOutcome::Fatal(AppError::StravaApi(format!(
                "JSON parse error for {}: {}",
                what, e
            ))),
        };
    }

    // Rate limit - wait and retry the same call
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return CallOutcome::RateLimited { retry_after };
    }

    let body = response.text().await.unwrap_or_default();

    match (endpoint, status.as_u16()) {
        (_, 401) => {
            CallOutcome::NeedsReauth(format!("Strava rejected the {} (401)", what))
        }
        // invalid_grant: the code or refresh token is expired, revoked or unknown
        (Endpoint::Token, 400) => {
            tracing::error!(status = %status, body = %body, "Strava token request rejected");
            CallOutcome::NeedsReauth(format!("Strava rejected the {}: {}", what, body))
        }
        (Endpoint::Api, 404) => CallOutcome::NotFound(what.to_string()),
        _ => CallOutcome::Fatal(AppError::StravaApi(format!("HTTP {}: {}", status, body))),
    }
}

/// Turn a `key_by_type` (object) or plain (array) streams body into a record.
fn parse_streams(activity_id: u64, body: Value) -> CallOutcome<StreamRecord> {
    let raw: Vec<(String, Value)> = match body {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, mut stream)| (key, take_data(&mut stream)))
            .collect(),
        Value::Array(streams) => streams
            .into_iter()
            .filter_map(|mut stream| {
                let key = stream["type"].as_str()?.to_string();
                Some((key, take_data(&mut stream)))
            })
            .collect(),
        other => {
            return CallOutcome::Fatal(AppError::StravaApi(format!(
                "Unexpected streams body for activity {}: {}",
                activity_id, other
            )))
        }
    };

    if raw.is_empty() {
        return CallOutcome::NotFound(format!("streams for activity {} (empty)", activity_id));
    }

    match StreamRecord::from_raw(activity_id, raw) {
        Ok(record) => CallOutcome::Ok(record),
        Err(e) => CallOutcome::Fatal(AppError::StravaApi(format!("Malformed stream: {}", e))),
    }
}

fn take_data(stream: &mut Value) -> Value {
    stream.get_mut("data").map(Value::take).unwrap_or(Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

/// Strava access with credential lifecycle and rate-limit handling.
///
/// Holds the current credentials in memory and persists every change
/// through the [`TokenStore`]. Every call first makes sure the access
/// token is valid (refreshing it if needed) and then goes through the
/// [`RetryPolicy`].
pub struct StravaService {
    client: StravaClient,
    tokens: TokenStore,
    retry: RetryPolicy,
    expiry_skew: Duration,
    credentials: Mutex<Option<Credentials>>,
}

impl StravaService {
    /// Create the service, loading any persisted credentials.
    pub fn new(
        client: StravaClient,
        tokens: TokenStore,
        retry: RetryPolicy,
        expiry_skew: Duration,
    ) -> Result<Self> {
        let credentials = tokens.load()?;
        Ok(Self {
            client,
            tokens,
            retry,
            expiry_skew,
            credentials: Mutex::new(credentials),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = StravaClient::new(
            config.strava.client_id.clone(),
            config.strava.client_secret.clone(),
        )
        .with_base_urls(&config.strava.api_base_url, &config.strava.oauth_base_url)
        .with_scope(&config.strava.scope);

        Self::new(
            client,
            TokenStore::new(config.paths.token_file()),
            RetryPolicy::new(std::time::Duration::from_secs(
                config.sync.retry_interval_seconds,
            )),
            Duration::seconds(config.sync.token_expiry_skew_seconds),
        )
    }

    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.lock().await.clone()
    }

    pub async fn auth_state(&self) -> AuthState {
        AuthState::of(
            self.credentials.lock().await.as_ref(),
            Utc::now(),
            self.expiry_skew,
        )
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Exchange an authorization code for credentials and persist them.
    pub async fn authorize(&self, code: &str) -> Result<Credentials> {
        let client = &self.client;
        let credentials = self
            .retry
            .run("token exchange", move || client.exchange_code(code))
            .await?;

        self.tokens.save(&credentials)?;
        *self.credentials.lock().await = Some(credentials.clone());
        tracing::info!(expires_at = credentials.expires_at, "New Strava token obtained");
        Ok(credentials)
    }

    /// Return a valid access token, refreshing it if it is (about to be) expired.
    ///
    /// A rejected refresh token clears the credentials, so the caller has to
    /// go through [`StravaService::authorize`] again.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let mut guard = self.credentials.lock().await;
        let current = guard.as_ref().ok_or_else(|| {
            AppError::Authorization("no Strava credentials are stored".to_string())
        })?;

        if !TokenStore::is_expired(current, Utc::now(), self.expiry_skew) {
            return Ok(current.access_token.clone());
        }

        tracing::info!(expires_at = current.expires_at, "Access token expired, refreshing");
        let client = &self.client;
        let refresh_token = current.refresh_token.clone();
        let refresh_token = refresh_token.as_str();
        let refreshed = self
            .retry
            .run("token refresh", move || client.refresh_token(refresh_token))
            .await;

        match refreshed {
            Ok(credentials) => {
                self.tokens.save(&credentials)?;
                let access_token = credentials.access_token.clone();
                *guard = Some(credentials);
                tracing::info!("Token refreshed and saved");
                Ok(access_token)
            }
            Err(e) if e.is_authorization_error() => {
                tracing::warn!(error = %e, "Refresh token rejected, re-authorization required");
                *guard = None;
                self.tokens.clear()?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ─── API Wrappers ────────────────────────────────────────────────────────

    /// Run one API call with a valid token, retrying on rate limits.
    async fn call<T, F, Fut>(&self, operation: &str, request: F) -> Result<T>
    where
        F: Fn(StravaClient, String) -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let request = &request;
        self.retry
            .run(operation, move || async move {
                let token = match self.ensure_valid_token().await {
                    Ok(t) => t,
                    Err(e) => return CallOutcome::Fatal(e),
                };
                request(self.client.clone(), token).await
            })
            .await
    }

    /// One page of activities (see [`StravaClient::list_activities`]).
    pub async fn list_activities(&self, page: u32, per_page: u32) -> Result<Vec<ActivitySummary>> {
        self.call("list activities", move |client, token| async move {
            client.list_activities(&token, page, per_page).await
        })
        .await
    }

    /// Streams for one activity. `NotFound` means Strava has none.
    pub async fn get_streams(&self, activity_id: u64, metrics: &MetricSet) -> Result<StreamRecord> {
        let keys = metrics.query_value();
        let keys = keys.as_str();
        self.call("get streams", move |client, token| async move {
            client.get_streams(&token, activity_id, keys).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorization_url_is_encoded() {
        let client = StravaClient::new("123".to_string(), "secret".to_string());
        let url = client.authorization_url("http://localhost:8765/callback", "st/ate");

        assert!(url.starts_with("https://www.strava.com/oauth/authorize?client_id=123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8765%2Fcallback"));
        assert!(url.contains("scope=profile%3Aread_all%2Cactivity%3Aread_all"));
        assert!(url.contains("approval_prompt=force"));
        assert!(url.contains("state=st%2Fate"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_base_urls_trim_trailing_slash() {
        let client = StravaClient::new("1".to_string(), "s".to_string())
            .with_base_urls("http://127.0.0.1:9000/api/v3/", "http://127.0.0.1:9000/oauth/");
        assert!(client
            .authorization_url("http://localhost", "x")
            .starts_with("http://127.0.0.1:9000/oauth/authorize?"));
    }

    #[test]
    fn test_parse_streams_key_by_type() {
        let body = json!({
            "time": { "data": [0, 1, 2], "series_type": "distance", "original_size": 3, "resolution": "high" },
            "heartrate": { "data": [120, 125, 130], "series_type": "distance", "original_size": 3, "resolution": "high" }
        });

        match parse_streams(5, body) {
            CallOutcome::Ok(record) => {
                assert_eq!(record.activity_id(), 5);
                assert_eq!(record.len(), 3);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_streams_array_form() {
        let body = json!([
            { "type": "time", "data": [0, 10] },
            { "type": "altitude", "data": [12.5, 13.0] }
        ]);
        assert!(matches!(parse_streams(5, body), CallOutcome::Ok(_)));
    }

    #[test]
    fn test_parse_streams_empty_is_not_found() {
        assert!(matches!(parse_streams(5, json!({})), CallOutcome::NotFound(_)));
        assert!(matches!(parse_streams(5, json!([])), CallOutcome::NotFound(_)));
    }

    #[test]
    fn test_parse_streams_misaligned_is_fatal() {
        let body = json!({
            "time": { "data": [0, 1, 2] },
            "watts": { "data": [100] }
        });
        assert!(matches!(
            parse_streams(5, body),
            CallOutcome::Fatal(AppError::StravaApi(_))
        ));
    }
}
