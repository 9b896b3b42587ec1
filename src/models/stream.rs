// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Activity stream (time-series) model.
//!
//! A stream record holds one sequence per metric, all aligned with `time`.
//! Strava returns these from `GET /activities/{id}/streams?key_by_type=true`
//! as `{ "<metric>": { "data": [...], ... }, ... }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A stream metric Strava can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMetric {
    Time,
    Distance,
    Latlng,
    Altitude,
    VelocitySmooth,
    Heartrate,
    Cadence,
    Watts,
    Temp,
    Moving,
    GradeSmooth,
}

impl StreamMetric {
    pub const ALL: [StreamMetric; 11] = [
        StreamMetric::Time,
        StreamMetric::Distance,
        StreamMetric::Latlng,
        StreamMetric::Altitude,
        StreamMetric::VelocitySmooth,
        StreamMetric::Heartrate,
        StreamMetric::Cadence,
        StreamMetric::Watts,
        StreamMetric::Temp,
        StreamMetric::Moving,
        StreamMetric::GradeSmooth,
    ];

    /// Key used by the Strava API.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamMetric::Time => "time",
            StreamMetric::Distance => "distance",
            StreamMetric::Latlng => "latlng",
            StreamMetric::Altitude => "altitude",
            StreamMetric::VelocitySmooth => "velocity_smooth",
            StreamMetric::Heartrate => "heartrate",
            StreamMetric::Cadence => "cadence",
            StreamMetric::Watts => "watts",
            StreamMetric::Temp => "temp",
            StreamMetric::Moving => "moving",
            StreamMetric::GradeSmooth => "grade_smooth",
        }
    }

    /// Parse the raw `data` array of this metric into its typed series.
    pub fn parse_series(self, data: Value) -> Result<StreamSeries, serde_json::Error> {
        Ok(match self {
            StreamMetric::Latlng => StreamSeries::Points(serde_json::from_value(data)?),
            StreamMetric::Moving => StreamSeries::Flags(serde_json::from_value(data)?),
            _ => StreamSeries::Values(serde_json::from_value(data)?),
        })
    }
}

impl fmt::Display for StreamMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown stream metric '{}'", s))
    }
}

/// The metrics requested for each activity. Always contains `time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StreamMetric>", into = "Vec<StreamMetric>")]
pub struct MetricSet(Vec<StreamMetric>);

impl MetricSet {
    pub fn new(metrics: impl IntoIterator<Item = StreamMetric>) -> Self {
        let mut set = vec![StreamMetric::Time];
        for metric in metrics {
            if !set.contains(&metric) {
                set.push(metric);
            }
        }
        Self(set)
    }

    pub fn metrics(&self) -> &[StreamMetric] {
        &self.0
    }

    /// Comma-separated value for the `keys` query parameter.
    pub fn query_value(&self) -> String {
        self.0
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new([
            StreamMetric::Distance,
            StreamMetric::Latlng,
            StreamMetric::Altitude,
            StreamMetric::VelocitySmooth,
            StreamMetric::Heartrate,
            StreamMetric::Cadence,
            StreamMetric::Watts,
            StreamMetric::Moving,
            StreamMetric::GradeSmooth,
        ])
    }
}

impl From<Vec<StreamMetric>> for MetricSet {
    fn from(metrics: Vec<StreamMetric>) -> Self {
        Self::new(metrics)
    }
}

impl From<MetricSet> for Vec<StreamMetric> {
    fn from(set: MetricSet) -> Self {
        set.0
    }
}

/// One metric's samples. Strava emits `null` for missing numeric samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamSeries {
    Values(Vec<Option<f64>>),
    Points(Vec<Option<[f64; 2]>>),
    Flags(Vec<bool>),
}

impl StreamSeries {
    pub fn len(&self) -> usize {
        match self {
            StreamSeries::Values(v) => v.len(),
            StreamSeries::Points(v) => v.len(),
            StreamSeries::Flags(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stream data for one activity.
///
/// Invariant: `time` is present and every other series has its length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamRecord")]
pub struct StreamRecord {
    activity_id: u64,
    series: BTreeMap<StreamMetric, StreamSeries>,
}

impl StreamRecord {
    pub fn new(
        activity_id: u64,
        series: BTreeMap<StreamMetric, StreamSeries>,
    ) -> Result<Self, String> {
        let samples = series
            .get(&StreamMetric::Time)
            .map(StreamSeries::len)
            .ok_or_else(|| format!("stream for activity {} has no time series", activity_id))?;

        if let Some((metric, s)) = series.iter().find(|(_, s)| s.len() != samples) {
            return Err(format!(
                "stream for activity {}: {} has {} samples, time has {}",
                activity_id,
                metric,
                s.len(),
                samples
            ));
        }

        Ok(Self {
            activity_id,
            series,
        })
    }

    /// Build a record from raw `metric -> data array` pairs, ignoring
    /// metrics this crate does not know about.
    pub fn from_raw(
        activity_id: u64,
        raw: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, String> {
        let mut series = BTreeMap::new();
        for (key, data) in raw {
            let Ok(metric) = key.parse::<StreamMetric>() else {
                tracing::debug!(activity_id, key = %key, "Ignoring unknown stream metric");
                continue;
            };
            let parsed = metric
                .parse_series(data)
                .map_err(|e| format!("invalid {} series: {}", metric, e))?;
            series.insert(metric, parsed);
        }
        Self::new(activity_id, series)
    }

    pub fn activity_id(&self) -> u64 {
        self.activity_id
    }

    /// Number of samples (length of `time`).
    pub fn len(&self) -> usize {
        self.series
            .get(&StreamMetric::Time)
            .map_or(0, StreamSeries::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, metric: StreamMetric) -> Option<&StreamSeries> {
        self.series.get(&metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = StreamMetric> + '_ {
        self.series.keys().copied()
    }
}

/// On-disk shape before validation.
#[derive(Deserialize)]
struct RawStreamRecord {
    activity_id: u64,
    series: BTreeMap<String, Value>,
}

impl TryFrom<RawStreamRecord> for StreamRecord {
    type Error = String;

    fn try_from(raw: RawStreamRecord) -> Result<Self, Self::Error> {
        StreamRecord::from_raw(raw.activity_id, raw.series)
    }
}
