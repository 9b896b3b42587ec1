// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase sync of activity summaries and streams.
//!
//! 1. Page through the athlete's activities and append the ones the cache
//!    does not know yet
//! 2. Fetch streams for every cached activity that has none
//!
//! Calls are strictly sequential. Each page and each stream is persisted
//! before the next request, so an aborted run keeps its progress and a
//! re-run picks up where it stopped.

use crate::config::Config;
use crate::error::{Result, SyncError, SyncPhase};
use crate::models::{ActivitySummary, MetricSet};
use crate::services::strava::StravaService;
use crate::store::ActivityCache;
use serde::Serialize;

/// Sync behaviour, from [`crate::config::SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_pages: u32,
    pub per_page: u32,
    pub skip_trainer_activities: bool,
    pub remember_missing_streams: bool,
    pub stream_metrics: MetricSet,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.sync.max_pages,
            per_page: config.sync.per_page,
            skip_trainer_activities: config.sync.skip_trainer_activities,
            remember_missing_streams: config.sync.remember_missing_streams,
            stream_metrics: config.sync.stream_metrics.clone(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_pages: 100,
            per_page: 100,
            skip_trainer_activities: false,
            remember_missing_streams: true,
            stream_metrics: MetricSet::default(),
        }
    }
}

/// Outcome of the activity phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySyncReport {
    pub pages_fetched: u32,
    pub activities_seen: usize,
    pub already_known: usize,
    pub skipped_trainer: usize,
    pub added: usize,
    pub reached_max_pages: bool,
}

/// Outcome of the stream phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSyncReport {
    pub already_present: usize,
    pub known_unavailable: usize,
    pub skipped_trainer: usize,
    pub fetched: usize,
    pub not_found: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub activities: ActivitySyncReport,
    /// `None` when the run was limited to activities
    pub streams: Option<StreamSyncReport>,
}

/// Drives both phases against one Strava session and one local cache.
pub struct SyncEngine {
    strava: StravaService,
    cache: ActivityCache,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(strava: StravaService, cache: ActivityCache, options: SyncOptions) -> Self {
        Self {
            strava,
            cache,
            options,
        }
    }

    pub fn strava(&self) -> &StravaService {
        &self.strava
    }

    pub fn cache(&self) -> &ActivityCache {
        &self.cache
    }

    /// Run both phases in order.
    pub async fn run(&mut self) -> std::result::Result<SyncReport, SyncError> {
        let activities = self
            .sync_activities()
            .await
            .map_err(|e| SyncError::new(SyncPhase::Activities, e))?;
        let streams = self
            .sync_streams()
            .await
            .map_err(|e| SyncError::new(SyncPhase::Streams, e))?;

        Ok(SyncReport {
            activities,
            streams: Some(streams),
        })
    }

    /// Run only the activity phase.
    pub async fn run_activities_only(&mut self) -> std::result::Result<SyncReport, SyncError> {
        let activities = self
            .sync_activities()
            .await
            .map_err(|e| SyncError::new(SyncPhase::Activities, e))?;
        Ok(SyncReport {
            activities,
            streams: None,
        })
    }

    /// Fetch activity pages until a short or empty page (or `max_pages`).
    ///
    /// Known ids are snapshotted once before the first page.
    pub async fn sync_activities(&mut self) -> Result<ActivitySyncReport> {
        self.strava.ensure_valid_token().await?;

        let known = self.cache.known_activity_ids();
        let per_page = self.options.per_page;
        let mut report = ActivitySyncReport::default();
        tracing::info!(known = known.len(), per_page, "Starting activity sync");

        for page in 1..=self.options.max_pages {
            let activities = self.strava.list_activities(page, per_page).await?;
            let fetched = activities.len();
            report.pages_fetched += 1;
            report.activities_seen += fetched;

            let mut survivors: Vec<ActivitySummary> = Vec::with_capacity(fetched);
            for activity in activities {
                if known.contains(&activity.id) {
                    report.already_known += 1;
                } else if self.options.skip_trainer_activities && activity.is_trainer {
                    tracing::debug!(activity_id = activity.id, "Skipping trainer activity");
                    report.skipped_trainer += 1;
                } else {
                    survivors.push(activity);
                }
            }

            if !survivors.is_empty() {
                report.added += self.cache.append_activities(&survivors)?;
            }
            tracing::info!(page, fetched, new = survivors.len(), "Activity page processed");

            if fetched < per_page as usize {
                break;
            }
            if page == self.options.max_pages {
                tracing::warn!(max_pages = page, "Stopped at page limit, older activities not fetched");
                report.reached_max_pages = true;
            }
        }

        tracing::info!(
            added = report.added,
            total = self.cache.len(),
            pages = report.pages_fetched,
            "Activity sync complete"
        );
        Ok(report)
    }

    /// Fetch streams for every cached activity that lacks one.
    ///
    /// A missing stream is logged and skipped; any other error aborts.
    pub async fn sync_streams(&mut self) -> Result<StreamSyncReport> {
        let mut report = StreamSyncReport::default();
        let mut pending = Vec::new();

        for activity in self.cache.activities() {
            if self.options.skip_trainer_activities && activity.is_trainer {
                report.skipped_trainer += 1;
            } else if self.cache.has_stream(activity.id) {
                report.already_present += 1;
            } else if self.options.remember_missing_streams
                && self.cache.is_stream_unavailable(activity.id)
            {
                report.known_unavailable += 1;
            } else {
                pending.push(activity.id);
            }
        }

        if pending.is_empty() {
            tracing::info!("All activity streams are already up to date");
            return Ok(report);
        }

        self.strava.ensure_valid_token().await?;
        tracing::info!(pending = pending.len(), "Starting stream sync");

        for activity_id in pending {
            match self
                .strava
                .get_streams(activity_id, &self.options.stream_metrics)
                .await
            {
                Ok(record) => {
                    self.cache.write_stream(activity_id, &record)?;
                    report.fetched += 1;
                    tracing::info!(activity_id, samples = record.len(), "Stream saved");
                }
                Err(e) if e.is_not_found() => {
                    tracing::info!(activity_id, "No stream data for activity, skipping");
                    report.not_found += 1;
                    if self.options.remember_missing_streams {
                        self.cache
                            .mark_stream_unavailable(activity_id, &e.to_string())?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            fetched = report.fetched,
            not_found = report.not_found,
            "Stream sync complete"
        );
        Ok(report)
    }
}
