//! Handler for the random quote endpoint.

use std::time::Instant;

use axum::{extract::State, Json};
use serde_json::json;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::mssql::Quote;
use crate::state::AppState;

/// Random quote from the database, keyed by its author, with the end-to-end
/// handler time in milliseconds.
#[instrument(name = "quote::random", skip(state))]
pub async fn random(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let start = Instant::now();

    let mut session = state.sql.open_session().await?;
    let quote = session.random_quote().await?;
    session.close().await?;

    let Some(quote) = quote else {
        return Err(AppError::EmptyTable);
    };

    let response_time_ms = round2(start.elapsed().as_secs_f64() * 1000.0);
    info!(response_time_ms, "quote retrieved");

    Ok(Json(quote_payload(&quote, response_time_ms)))
}

fn quote_payload(quote: &Quote, response_time_ms: f64) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(
        quote.author.clone(),
        serde_json::Value::String(quote.text.clone()),
    );
    body.insert("response_time_ms".to_string(), json!(response_time_ms));
    serde_json::Value::Object(body)
}

fn round2(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_keys_quote_by_author() {
        let quote = Quote {
            text: "Stay hungry, stay foolish.".to_string(),
            author: "Steve Jobs".to_string(),
        };
        let payload = quote_payload(&quote, 12.34);
        assert_eq!(payload["Steve Jobs"], "Stay hungry, stay foolish.");
        assert_eq!(payload["response_time_ms"], 12.34);
        assert_eq!(payload.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.346), 12.35);
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(round2(12.0), 12.0);
        assert_eq!(round2(0.004), 0.0);
    }
}
