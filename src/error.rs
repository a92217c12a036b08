use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::mssql::{ConnectionError, QueryError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No quotes found")]
    EmptyTable,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::EmptyTable => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "No quotes found",
                    "message": "The quotes table is empty",
                }),
            ),
            AppError::Query(e) => {
                tracing::error!("Database query error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Database error",
                        "message": e.to_string(),
                        "sqlstate": e.state.map_or_else(|| json!("N/A"), |s| json!(s)),
                        "error_code": e.code.map_or_else(|| json!("N/A"), |c| json!(c)),
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                )
            }
            AppError::Connection(e) => {
                tracing::error!("Database connection error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, connection_body(e))
            }
            AppError::Internal(message) => {
                tracing::error!("Application error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Application error",
                        "message": message,
                        "timestamp": Utc::now().to_rfc3339(),
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn connection_body(err: &ConnectionError) -> serde_json::Value {
    match err {
        // Token acquisition failures surface the way any other
        // pre-connection failure does.
        ConnectionError::Identity(e) => json!({
            "error": "Application error",
            "message": e.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        }),
        ConnectionError::Timeout { server, database } => json!({
            "error": "Database connection failed",
            "message": err.to_string(),
            "kind": "timeout",
            "server": server,
            "database": database,
            "timestamp": Utc::now().to_rfc3339(),
        }),
        ConnectionError::Driver {
            kind,
            message,
            server,
            database,
        } => {
            let mut body = json!({
                "error": "Database connection failed",
                "message": message,
                "kind": kind.as_str(),
                "server": server,
                "database": database,
                "timestamp": Utc::now().to_rfc3339(),
            });
            if let Some(suggestion) = kind.suggestion() {
                body["suggestion"] = json!(suggestion);
            }
            body
        }
    }
}
