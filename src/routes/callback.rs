// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-shot loopback server that receives the OAuth redirect.
//!
//! Strava redirects the browser to `/callback?code=...&state=...`. The
//! first request carrying the expected state (or an `error`) ends the
//! wait; requests with a wrong state are answered with 400 and ignored.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::{AppError, Result};

type Delivery = std::result::Result<String, String>;

struct CallbackState {
    expected_state: String,
    tx: mpsc::Sender<Delivery>,
}

/// Query parameters Strava appends to the redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

fn routes(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/callback", get(oauth_callback))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn oauth_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let state_ok = params
        .state
        .as_deref()
        .map(|s| bool::from(s.as_bytes().ct_eq(state.expected_state.as_bytes())))
        .unwrap_or(false);

    if !state_ok {
        tracing::warn!("OAuth callback with missing or mismatched state, ignoring");
        return (StatusCode::BAD_REQUEST, "Invalid state parameter").into_response();
    }

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "User did not grant access");
        let _ = state.tx.try_send(Err(error));
        return (
            StatusCode::BAD_REQUEST,
            Html("<p>Strava access was not granted. You can close this window.</p>"),
        )
            .into_response();
    }

    match params.code.filter(|c| !c.is_empty()) {
        Some(code) => {
            let _ = state.tx.try_send(Ok(code));
            Html("<p>Authorization complete. You can close this window.</p>").into_response()
        }
        None => (StatusCode::BAD_REQUEST, "Missing code parameter").into_response(),
    }
}

/// Bind the loopback listener on `127.0.0.1:port`.
pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to bind port {}: {}", port, e)))
}

/// Serve `listener` until a callback with `expected_state` arrives.
///
/// Returns the authorization code, or an authorization error when the
/// user declined access.
pub async fn wait_for_code(listener: TcpListener, expected_state: &str) -> Result<String> {
    let (tx, mut rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = routes(Arc::new(CallbackState {
        expected_state: expected_state.to_string(),
        tx,
    }));

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Waiting for OAuth callback");
    }

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    let delivery = rx.recv().await;
    let _ = shutdown_tx.send(());
    // Idle browser connections must not keep us here.
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Callback server error"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Callback server task failed"),
        _ => {}
    }

    match delivery {
        Some(Ok(code)) => Ok(code),
        Some(Err(error)) => Err(AppError::Authorization(format!(
            "Strava returned error '{}'",
            error
        ))),
        None => Err(AppError::Internal(anyhow::anyhow!(
            "Callback server stopped before receiving a code"
        ))),
    }
}
