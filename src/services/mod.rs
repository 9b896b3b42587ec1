// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod oauth;
pub mod retry;
pub mod strava;
pub mod sync;

pub use oauth::{establish_session, AuthorizeOptions, CodeSource};
pub use retry::{CallOutcome, RetryPolicy};
pub use strava::{StravaClient, StravaService};
pub use sync::{ActivitySyncReport, StreamSyncReport, SyncEngine, SyncOptions, SyncReport};
