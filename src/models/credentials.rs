// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! OAuth2 credentials for the Strava API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strava OAuth2 token set.
///
/// Deserializes directly from the token endpoint response (extra fields
/// such as `athlete` and `token_type` are ignored).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of `access_token` as reported by Strava (Unix timestamp)
    pub expires_at: i64,
}

impl Credentials {
    /// True when `now + skew >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        (now + skew).timestamp() >= self.expires_at
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Authentication state of a session.
///
/// `NoCredentials -> Valid -> Expired -> Valid` on a successful refresh,
/// or `Expired -> NoCredentials` when the refresh token is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoCredentials,
    Valid,
    Expired,
}

impl AuthState {
    pub fn of(credentials: Option<&Credentials>, now: DateTime<Utc>, skew: Duration) -> Self {
        match credentials {
            None => AuthState::NoCredentials,
            Some(c) if c.is_expired(now, skew) => AuthState::Expired,
            Some(_) => AuthState::Valid,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::NoCredentials => "no credentials",
            AuthState::Valid => "valid",
            AuthState::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: i64) -> Credentials {
        Credentials {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_expiry_respects_skew() {
        let now = DateTime::from_timestamp(1_000_000, 0).unwrap();
        let skew = Duration::seconds(60);

        assert!(!creds(1_000_061).is_expired(now, skew));
        assert!(creds(1_000_060).is_expired(now, skew));
        assert!(creds(999_999).is_expired(now, skew));
    }

    #[test]
    fn test_auth_state_transitions() {
        let now = DateTime::from_timestamp(1_000_000, 0).unwrap();
        let skew = Duration::seconds(60);

        assert_eq!(AuthState::of(None, now, skew), AuthState::NoCredentials);
        assert_eq!(
            AuthState::of(Some(&creds(2_000_000)), now, skew),
            AuthState::Valid
        );
        assert_eq!(
            AuthState::of(Some(&creds(1_000_030)), now, skew),
            AuthState::Expired
        );
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug = format!("{:?}", creds(42));
        assert!(!debug.contains("access\""));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("42"));
    }

    #[test]
    fn test_deserialize_token_response() {
        let json = serde_json::json!({
            "token_type": "Bearer",
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_at": 1700000000,
            "expires_in": 21600,
            "athlete": { "id": 1 }
        });
        let c: Credentials = serde_json::from_value(json).unwrap();
        assert_eq!(c.access_token, "a1");
        assert_eq!(c.expires_at, 1_700_000_000);
    }
}
