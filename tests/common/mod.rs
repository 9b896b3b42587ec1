// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use strava_sync::models::Credentials;
use strava_sync::services::{RetryPolicy, StravaClient, StravaService, SyncEngine, SyncOptions};
use strava_sync::store::{ActivityCache, TokenStore};
use tempfile::TempDir;
use wiremock::MockServer;

pub const API_PREFIX: &str = "/api/v3";
pub const OAUTH_PREFIX: &str = "/oauth";

/// A mock Strava server plus a private data directory.
pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn token_file(&self) -> PathBuf {
        self.dir.path().join("token.json")
    }

    pub fn activities_file(&self) -> PathBuf {
        self.dir.path().join("activities.jsonl")
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.dir.path().join("streams")
    }

    pub fn token_store(&self) -> TokenStore {
        TokenStore::new(self.token_file())
    }

    /// Persist credentials valid for another hour.
    #[allow(dead_code)]
    pub fn seed_valid_token(&self) {
        self.seed_token("test_access", "test_refresh", chrono::Utc::now().timestamp() + 3600);
    }

    pub fn seed_token(&self, access: &str, refresh: &str, expires_at: i64) {
        self.token_store()
            .save(&Credentials {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                expires_at,
            })
            .expect("seed token");
    }

    pub fn client(&self) -> StravaClient {
        let uri = self.server.uri();
        StravaClient::new("test_id".to_string(), "test_secret".to_string()).with_base_urls(
            &format!("{}{}", uri, API_PREFIX),
            &format!("{}{}", uri, OAUTH_PREFIX),
        )
    }

    /// Service with a short retry interval so rate-limit tests stay fast.
    pub fn service(&self) -> StravaService {
        self.service_with_retry(Duration::from_millis(10))
    }

    pub fn service_with_retry(&self, interval: Duration) -> StravaService {
        StravaService::new(
            self.client(),
            self.token_store(),
            RetryPolicy::new(interval),
            chrono::Duration::seconds(60),
        )
        .expect("service")
    }

    pub fn cache(&self) -> ActivityCache {
        ActivityCache::open(self.activities_file(), self.streams_dir()).expect("cache")
    }

    #[allow(dead_code)]
    pub fn engine(&self, options: SyncOptions) -> SyncEngine {
        SyncEngine::new(self.service(), self.cache(), options)
    }
}

/// Options with a page size small enough for hand-written pages.
#[allow(dead_code)]
pub fn small_pages(per_page: u32) -> SyncOptions {
    SyncOptions {
        per_page,
        max_pages: 10,
        ..SyncOptions::default()
    }
}

/// Activity summary as `GET /athlete/activities` returns it.
#[allow(dead_code)]
pub fn activity_json(id: u64, trainer: bool) -> Value {
    json!({
        "id": id,
        "name": format!("Activity {}", id),
        "type": if trainer { "VirtualRide" } else { "Ride" },
        "sport_type": if trainer { "VirtualRide" } else { "Ride" },
        "distance": 10000.0 + id as f64,
        "moving_time": 1800,
        "elapsed_time": 1900,
        "total_elevation_gain": 120.5,
        "start_date": "2025-06-01T15:04:05Z",
        "trainer": trainer,
        "manual": false,
        "athlete": { "id": 42, "resource_state": 1 }
    })
}

#[allow(dead_code)]
pub fn page_json(ids: &[u64]) -> Value {
    Value::Array(ids.iter().map(|id| activity_json(*id, false)).collect())
}

/// Streams body with `key_by_type=true`.
#[allow(dead_code)]
pub fn streams_json(samples: usize) -> Value {
    let time: Vec<u64> = (0..samples as u64).collect();
    let hr: Vec<u64> = (0..samples as u64).map(|i| 120 + i).collect();
    json!({
        "time": { "data": time, "series_type": "distance", "original_size": samples, "resolution": "high" },
        "heartrate": { "data": hr, "series_type": "distance", "original_size": samples, "resolution": "high" }
    })
}

/// Token endpoint response.
#[allow(dead_code)]
pub fn token_json(access: &str, refresh: &str, expires_at: i64) -> Value {
    json!({
        "token_type": "Bearer",
        "access_token": access,
        "refresh_token": refresh,
        "expires_at": expires_at,
        "expires_in": 21600,
        "athlete": { "id": 42 }
    })
}
