// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token file persistence.

use crate::error::{AppError, Result};
use crate::models::Credentials;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads and atomically replaces the credentials file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted credentials.
    ///
    /// `Ok(None)` means first run. An unreadable or malformed file is also
    /// treated as absent so that the user can simply re-authorize.
    pub fn load(&self) -> Result<Option<Credentials>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Token file not found");
                return Ok(None);
            }
            Err(e) => return Err(AppError::io("Failed to read", &self.path, e)),
        };

        match serde_json::from_str(&text) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not parse token file, ignoring it"
                );
                Ok(None)
            }
        }
    }

    /// Persist credentials with replace-on-write.
    ///
    /// The new contents go to a temp file in the same directory which is
    /// then renamed over the old file, so a crash leaves either the old or
    /// the new file, never a partial one.
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_vec_pretty(credentials)
            .map_err(|e| AppError::Persistence(format!("Failed to encode token: {}", e)))?;
        super::write_atomic(&self.path, &json)?;

        tracing::info!(
            path = %self.path.display(),
            expires_at = credentials.expires_at,
            "Token saved"
        );
        Ok(())
    }

    /// Remove persisted credentials (after the refresh token was rejected).
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::io("Failed to remove", &self.path, e)),
        }
    }

    /// True when `now + skew >= expires_at`.
    pub fn is_expired(credentials: &Credentials, now: DateTime<Utc>, skew: Duration) -> bool {
        credentials.is_expired(now, skew)
    }
}
