// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types.

use crate::config::ConfigError;
use std::fmt;

/// Application error type shared by every layer of the sync pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authorization failed: {0} (run `strava-sync authorize` and retry)")]
    Authorization(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Strava API error: {0}")]
    StravaApi(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the error requires the user to re-authorize.
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, AppError::Authorization(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Wrap an I/O failure on a local path.
    pub(crate) fn io(action: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        AppError::Persistence(format!("{} {}: {}", action, path.display(), err))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Phase of a sync run, used to report where a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Authorization,
    Activities,
    Streams,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Authorization => "authorization",
            SyncPhase::Activities => "activity sync",
            SyncPhase::Streams => "stream sync",
        };
        f.write_str(name)
    }
}

/// A failed sync run: which phase failed and why.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct SyncError {
    pub phase: SyncPhase,
    #[source]
    pub source: AppError,
}

impl SyncError {
    pub fn new(phase: SyncPhase, source: AppError) -> Self {
        Self { phase, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_names_phase() {
        let err = SyncError::new(
            SyncPhase::Streams,
            AppError::Persistence("disk full".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "stream sync failed: Persistence error: disk full"
        );
    }

    #[test]
    fn test_authorization_error_is_actionable() {
        let err = AppError::Authorization("refresh token rejected".to_string());
        assert!(err.is_authorization_error());
        assert!(err.to_string().contains("strava-sync authorize"));
    }

    #[test]
    fn test_error_classification() {
        assert!(AppError::NotFound("streams".to_string()).is_not_found());
        assert!(!AppError::StravaApi("HTTP 500".to_string()).is_not_found());
        assert!(!AppError::StravaApi("HTTP 500".to_string()).is_authorization_error());
    }
}
