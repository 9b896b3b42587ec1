// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava activity summary model, as listed by the API and stored in the cache.

use serde::{Deserialize, Serialize};

/// Summary of one activity from `GET /athlete/activities`.
///
/// Identified solely by `id`; never updated once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Strava activity ID
    pub id: u64,
    /// Activity name/title
    pub name: String,
    /// Activity type (Ride, Run, Hike, etc.)
    #[serde(rename = "type", default)]
    pub activity_type: String,
    /// Sport type (finer grained than `type`, e.g. MountainBikeRide)
    #[serde(default)]
    pub sport_type: Option<String>,
    /// Distance in meters
    #[serde(default)]
    pub distance: f64,
    /// Moving time in seconds
    #[serde(default)]
    pub moving_time: u64,
    /// Elapsed time in seconds
    #[serde(default)]
    pub elapsed_time: u64,
    /// Total elevation gain in meters
    #[serde(rename = "total_elevation_gain", default)]
    pub elevation_gain: f64,
    /// Start date/time (ISO 8601, UTC)
    pub start_date: String,
    /// Recorded on a trainer / indoors
    #[serde(rename = "trainer", default)]
    pub is_trainer: bool,
    /// Manually entered (never has streams)
    #[serde(default)]
    pub manual: bool,
}
