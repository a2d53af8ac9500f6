//! Local HTTP surface.
//!
//! Bound to loopback only. Two endpoints: `POST /recurring/execute` invokes
//! the engine synchronously and returns the aggregate (or `409 busy`), and
//! `GET /recurring/status` reports the last run, the next scheduled fire,
//! and a preview of the orders due today. Errors use the
//! `{"status":"error","message":…}` envelope.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use crate::engine::OrderEngine;
use crate::error::{Error, Result};
use crate::scheduler::SchedulerStatus;

/// Shared state behind the HTTP handlers.
pub struct AppState {
    /// The engine every execute call contends on.
    pub engine: Arc<OrderEngine>,
    /// Scheduler status snapshot, refreshed by the scheduler task.
    pub scheduler_status: Arc<Mutex<SchedulerStatus>>,
}

/// Build the router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/recurring/execute", post(execute))
        .route("/recurring/status", get(status))
        .with_state(state)
}

/// Serve the local API until shutdown.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "local API listening on 127.0.0.1");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

async fn execute(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.execute_due(Utc::now()).await {
        Ok(report) => {
            if let Some(reason) = report.aborted.clone() {
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "status": "error", "message": reason, "result": report })),
                )
                    .into_response()
            } else {
                Json(report).into_response()
            }
        }
        Err(Error::Busy) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "busy" }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let engine_status = state.engine.status();
    let scheduler = state
        .scheduler_status
        .lock()
        .expect("status lock poisoned")
        .clone();

    let due_preview = match state.engine.due_preview(Utc::now()).await {
        Ok(orders) => orders
            .iter()
            .map(|order| {
                json!({
                    "row_index": order.row_index,
                    "symbol": order.symbol,
                    "frequency": order.frequency,
                })
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!(error = %e, "due preview unavailable");
            Vec::new()
        }
    };

    Json(json!({
        "last_run_at": engine_status.last_run_at,
        "last_run": engine_status.last_result,
        "next_fire": scheduler.next_fire,
        "last_health_tick": scheduler.last_health_tick,
        "due_preview": due_preview,
    }))
    .into_response()
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::Busy => StatusCode::CONFLICT,
        Error::Validation(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::Broker { .. } | Error::Auth(_) | Error::OrderProtocol(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "status": "error", "message": error.to_string() })),
    )
        .into_response()
}
