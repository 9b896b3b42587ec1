// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava-Sync command-line tool
//!
//! Mirrors a Strava athlete's activity summaries and sensor streams into
//! a local data directory.
//!
//! ```bash
//! # First run: authorize via a local callback server, then sync
//! strava-sync sync --listen 8765
//!
//! # Later runs reuse (and refresh) the stored token
//! strava-sync sync --config strava.yaml
//!
//! # Show what is cached, without network access
//! strava-sync status
//! ```

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use strava_sync::{
    config::{Config, ConfigOverrides},
    error::{SyncError, SyncPhase},
    models::AuthState,
    services::{
        establish_session, oauth::authorize_interactive, AuthorizeOptions, CodeSource,
        StravaService, SyncEngine, SyncOptions, SyncReport,
    },
    store::{ActivityCache, TokenStore},
    time_utils::format_unix_seconds,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "strava-sync",
    version,
    about = "Incrementally sync Strava activities and streams to local storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Strava client ID override
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Strava client secret override
    #[arg(long, global = true)]
    client_secret: Option<String>,

    /// Data directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Sync activities, then streams
    Sync {
        #[command(flatten)]
        auth: AuthArgs,

        /// Only sync activity summaries
        #[arg(long)]
        activities_only: bool,
    },

    /// Authorize access to Strava and store the token
    Authorize {
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Show local sync state
    Status,
}

/// How to obtain an authorization code if one is needed.
#[derive(Args)]
struct AuthArgs {
    /// Authorization code from a previous redirect
    #[arg(long, conflicts_with = "listen")]
    code: Option<String>,

    /// Catch the redirect on a local callback server on this port
    #[arg(long)]
    listen: Option<u16>,
}

impl AuthArgs {
    fn code_source(&self) -> CodeSource {
        match (&self.code, self.listen) {
            (Some(code), _) => CodeSource::Provided(code.clone()),
            (None, Some(port)) => CodeSource::Loopback { port },
            (None, None) => CodeSource::Prompt,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json, cli.verbose);

    let overrides = ConfigOverrides {
        config_file: cli.config.clone(),
        client_id: cli.client_id.clone(),
        client_secret: cli.client_secret.clone(),
        data_dir: cli.data_dir.clone(),
    };

    let run = async {
        match &cli.command {
            Command::Sync {
                auth,
                activities_only,
            } => sync(&overrides, auth.code_source(), *activities_only).await,
            Command::Authorize { auth } => authorize(&overrides, auth.code_source()).await,
            Command::Status => status(&overrides),
        }
    };

    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping (completed work is kept)");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "strava-sync failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn sync(
    overrides: &ConfigOverrides,
    source: CodeSource,
    activities_only: bool,
) -> anyhow::Result<()> {
    let config = Config::load(overrides)?;
    let strava = StravaService::from_config(&config)?;

    establish_session(&strava, &AuthorizeOptions::from_config(&config), &source)
        .await
        .map_err(|e| SyncError::new(SyncPhase::Authorization, e))?;

    let cache = ActivityCache::open(config.paths.activities_file(), config.paths.streams_dir())?;
    let mut engine = SyncEngine::new(strava, cache, SyncOptions::from_config(&config));

    let report = if activities_only {
        engine.run_activities_only().await?
    } else {
        engine.run().await?
    };
    log_report(&report);
    Ok(())
}

async fn authorize(overrides: &ConfigOverrides, source: CodeSource) -> anyhow::Result<()> {
    let config = Config::load(overrides)?;
    let strava = StravaService::from_config(&config)?;

    let credentials =
        authorize_interactive(&strava, &AuthorizeOptions::from_config(&config), &source)
            .await
            .map_err(|e| SyncError::new(SyncPhase::Authorization, e))?;

    println!(
        "Authorized. Token saved to {} (expires {}).",
        config.paths.token_file().display(),
        format_unix_seconds(credentials.expires_at).unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

fn status(overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let config = Config::load(overrides)?;
    let tokens = TokenStore::new(config.paths.token_file());
    let credentials = tokens.load()?;
    let state = AuthState::of(
        credentials.as_ref(),
        Utc::now(),
        chrono::Duration::seconds(config.sync.token_expiry_skew_seconds),
    );

    let cache = ActivityCache::open(config.paths.activities_file(), config.paths.streams_dir())
        .context("Failed to open activity cache")?;

    println!("Data directory:      {}", config.paths.data_dir.display());
    println!("Authorization:       {}", state);
    if let Some(expires) = credentials
        .as_ref()
        .and_then(|c| format_unix_seconds(c.expires_at))
    {
        println!("Token expires:       {}", expires);
    }
    println!("Cached activities:   {}", cache.len());
    println!("Streams stored:      {}", cache.stream_count()?);
    println!("Streams unavailable: {}", cache.unavailable_count()?);
    Ok(())
}

fn log_report(report: &SyncReport) {
    let a = &report.activities;
    tracing::info!(
        pages = a.pages_fetched,
        added = a.added,
        already_known = a.already_known,
        skipped_trainer = a.skipped_trainer,
        "Activities synced"
    );
    if let Some(s) = &report.streams {
        tracing::info!(
            fetched = s.fetched,
            not_found = s.not_found,
            already_present = s.already_present,
            known_unavailable = s.known_unavailable,
            "Streams synced"
        );
    }
}

/// Initialize logging: JSON (flattened, as for log collectors) or human-readable.
fn init_logging(json: bool, verbose: bool) {
    let default_directive = if verbose { "strava_sync=debug" } else { "strava_sync=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{},warn", default_directive)));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
