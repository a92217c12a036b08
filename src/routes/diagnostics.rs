//! Connection diagnostics and service metadata endpoints.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;
use tracing::{error, instrument};

use crate::config::DIAGNOSTIC_PREVIEW_LIMIT;
use crate::error::AppError;
use crate::mssql::ConnectionError;
use crate::state::AppState;

/// Staged connection test: token acquisition, session establishment, then
/// the diagnostic statement set, each timed separately.
#[instrument(name = "diagnostics::test_connection", skip(state))]
pub async fn test_connection(State(state): State<AppState>) -> impl IntoResponse {
    match run_connection_test(&state).await {
        Ok(report) => (StatusCode::OK, Json(report)),
        Err(e) => {
            error!("Connection test failed: {e}");
            let mut body = json!({
                "status": "failed",
                "error": e.to_string(),
            });
            if state.config.debug {
                body["detail"] = json!(format!("{e:?}"));
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

async fn run_connection_test(state: &AppState) -> Result<serde_json::Value, AppError> {
    let token_start = Instant::now();
    let token = state
        .identity
        .get_token()
        .await
        .map_err(ConnectionError::from)?;
    let token_time_ms = elapsed_ms(token_start);

    let db_start = Instant::now();
    let mut session = state.sql.open_session().await?;

    let sql_version = session
        .server_version()
        .await?
        .unwrap_or_else(|| "N/A".to_string());
    let quote_count = session.quote_count().await?;
    let sample = session.sample_quote().await?;
    session.close().await?;
    let db_time_ms = elapsed_ms(db_start);

    let descriptor = state.sql.descriptor();
    Ok(json!({
        "status": "success",
        "tests": {
            "token_acquisition": {
                "status": "passed",
                "time_ms": token_time_ms,
                "token_length": token.len(),
            },
            "database_connection": {
                "status": "passed",
                "time_ms": db_time_ms,
                "server": descriptor.server,
                "database": descriptor.database,
            },
            "query_execution": {
                "status": "passed",
                "sql_version": truncate(&sql_version, DIAGNOSTIC_PREVIEW_LIMIT),
                "quote_count": quote_count,
                "sample_quote": sample.map(|q| json!({
                    "quote": truncate(&q.text, DIAGNOSTIC_PREVIEW_LIMIT),
                    "author": q.author,
                })),
            },
        },
        "connection_details": {
            "endpoint_type": if state.config.is_private_endpoint() { "private" } else { "public" },
            "ssl_validation": "bypassed",
        },
    }))
}

/// Static service information (extendable with a real metrics backend).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": state.config.app_name,
        "status": "running",
        "timestamp": Utc::now().to_rfc3339(),
        "endpoints": ["/", "/health", "/test/connection", "/metrics"],
    }))
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
