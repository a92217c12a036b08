//! Health and orchestration probe endpoints.
//!
//! `/healthz` is a pure liveness probe and never touches a downstream
//! dependency. `/ready` opens a database session, so the orchestrator
//! withholds traffic while the database is unreachable. `/health` reports
//! per-component status for the identity service and the database.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    components: HealthComponents,
    details: HealthDetails,
}

#[derive(Debug, Serialize)]
struct HealthComponents {
    managed_identity: &'static str,
    database: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthDetails {
    sql_server: String,
    database: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    status: &'static str,
    service: String,
    endpoint: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    service: String,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    endpoint: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Open a session and run the trivial statement, closing on success.
async fn ping_database(state: &AppState) -> Result<(), AppError> {
    let mut session = state.sql.open_session().await?;
    session.ping().await?;
    session.close().await?;
    Ok(())
}

/// Composite health check. Token acquisition is probed first; the database
/// is not probed at all when no token can be obtained.
#[instrument(name = "health::composite", skip(state))]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let token_obtained = match state.identity.get_token().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Token acquisition in health check failed: {e}");
            false
        }
    };

    let mut db_connected = false;
    if token_obtained {
        match ping_database(&state).await {
            Ok(()) => db_connected = true,
            Err(e) => warn!("Database connection in health check failed: {e}"),
        }
    }

    let healthy = token_obtained && db_connected;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" },
            service: state.config.app_name.clone(),
            components: HealthComponents {
                managed_identity: if token_obtained { "healthy" } else { "unhealthy" },
                database: if db_connected { "healthy" } else { "unhealthy" },
            },
            details: HealthDetails {
                sql_server: state.config.sql_server.clone(),
                database: state.config.sql_database.clone(),
                timestamp: Utc::now().to_rfc3339(),
            },
        }),
    )
}

/// Liveness probe. Answers as long as the process serves HTTP.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: "healthy",
        service: state.config.app_name.clone(),
        endpoint: "liveness",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness probe. The database must answer a trivial query before the
/// instance reports ready.
#[instrument(name = "health::ready", skip(state))]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match ping_database(&state).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                service: state.config.app_name.clone(),
                database: "connected",
                error: None,
                endpoint: "readiness",
                timestamp: Some(Utc::now().to_rfc3339()),
            }),
        ),
        Err(e) => {
            warn!("Readiness probe failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "not_ready",
                    service: state.config.app_name.clone(),
                    database: "disconnected",
                    error: Some(e.to_string()),
                    endpoint: "readiness",
                    timestamp: None,
                }),
            )
        }
    }
}
