// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration.
//!
//! Sources, highest precedence first: command-line flags, YAML config file,
//! environment variables (a `.env` file is loaded if present), defaults.
//! Field constraints are checked once at load time; nothing downstream
//! re-validates.

use crate::models::MetricSet;
use crate::services::strava::{DEFAULT_API_BASE_URL, DEFAULT_OAUTH_BASE_URL};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[validate(nested)]
    pub strava: StravaConfig,
    #[validate(nested)]
    pub paths: PathsConfig,
    #[validate(nested)]
    pub sync: SyncConfig,
}

/// Strava application credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct StravaConfig {
    /// Strava OAuth client ID (public)
    pub client_id: String,
    /// Strava OAuth client secret
    pub client_secret: String,
    #[validate(url)]
    pub api_base_url: String,
    #[validate(url)]
    pub oauth_base_url: String,
    /// Redirect URI registered with the Strava application
    #[validate(url)]
    pub redirect_uri: String,
    #[validate(length(min = 1))]
    pub scope: String,
}

impl Default for StravaConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            redirect_uri: "http://localhost".to_string(),
            scope: "profile:read_all,activity:read_all".to_string(),
        }
    }
}

/// Where local state lives. Unset files default to locations in `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub token_file: Option<PathBuf>,
    pub activities_file: Option<PathBuf>,
    pub streams_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            token_file: None,
            activities_file: None,
            streams_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn token_file(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("token.json"))
    }

    pub fn activities_file(&self) -> PathBuf {
        self.activities_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("activities.jsonl"))
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.streams_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("streams"))
    }

    /// Create every directory the stores write into.
    pub fn ensure_exist(&self) -> Result<(), ConfigError> {
        let token_file = self.token_file();
        let activities_file = self.activities_file();
        let dirs = [
            Some(self.data_dir.clone()),
            Some(self.streams_dir()),
            token_file.parent().map(Path::to_path_buf),
            activities_file.parent().map(Path::to_path_buf),
        ];
        for dir in dirs.into_iter().flatten() {
            if dir.as_os_str().is_empty() {
                continue;
            }
            fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".strava_sync")
        .join("data")
}

/// Sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Safety bound on activity pages per run
    #[validate(range(min = 1))]
    pub max_pages: u32,
    /// Activities per page (Strava allows at most 200)
    #[validate(range(min = 1, max = 200))]
    pub per_page: u32,
    /// Wait after a 429 when Strava suggests nothing longer
    #[validate(range(min = 1))]
    pub retry_interval_seconds: u64,
    pub skip_trainer_activities: bool,
    /// Treat tokens as expired this many seconds early
    #[validate(range(min = 0, max = 3600))]
    pub token_expiry_skew_seconds: i64,
    /// Record activities without stream data so they are not re-queried
    pub remember_missing_streams: bool,
    #[validate(range(min = 1))]
    pub max_auth_attempts: u32,
    pub stream_metrics: MetricSet,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            per_page: 100,
            retry_interval_seconds: 900,
            skip_trainer_activities: false,
            token_expiry_skew_seconds: 60,
            remember_missing_streams: true,
            max_auth_attempts: 3,
            stream_metrics: MetricSet::default(),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load, layer, validate and prepare directories.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let mut config = match &overrides.config_file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading settings from file");
                Self::from_yaml_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.apply_overrides(overrides);
        config.check()?;
        config.paths.ensure_exist()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }

    /// Fill values the file left unset from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if self.strava.client_id.is_empty() {
            if let Some(v) = lookup("STRAVA_CLIENT_ID") {
                self.strava.client_id = v;
            }
        }
        if self.strava.client_secret.is_empty() {
            if let Some(v) = lookup("STRAVA_CLIENT_SECRET") {
                self.strava.client_secret = v;
            }
        }
        if self.paths.data_dir == default_data_dir() {
            if let Some(v) = lookup("STRAVA_SYNC_DATA_DIR") {
                self.paths.data_dir = PathBuf::from(v);
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(id) = overrides.client_id.as_deref().filter(|v| !v.is_empty()) {
            self.strava.client_id = id.to_string();
        }
        if let Some(secret) = overrides.client_secret.as_deref().filter(|v| !v.is_empty()) {
            self.strava.client_secret = secret.to_string();
        }
        if let Some(dir) = &overrides.data_dir {
            self.paths.data_dir = dir.clone();
        }
    }

    /// Required values and field constraints.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.strava.client_id.is_empty() {
            return Err(ConfigError::Missing("STRAVA_CLIENT_ID"));
        }
        if self.strava.client_secret.is_empty() {
            return Err(ConfigError::Missing("STRAVA_CLIENT_SECRET"));
        }
        self.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
