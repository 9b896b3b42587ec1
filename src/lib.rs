// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava-Sync: incremental local mirror of a Strava athlete's data
//!
//! This crate keeps a local cache of activity summaries and per-activity
//! sensor streams up to date, resuming safely after interruptions and
//! waiting out Strava's rate limits.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod time_utils;
