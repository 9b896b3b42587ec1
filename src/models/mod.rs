// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod credentials;
pub mod stream;

pub use activity::ActivitySummary;
pub use credentials::{AuthState, Credentials};
pub use stream::{MetricSet, StreamMetric, StreamRecord, StreamSeries};
