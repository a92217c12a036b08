//! State shared across request handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::identity::TokenProvider;
use crate::mssql::{SessionDescriptor, SqlClient};

/// Handler-shared state: the configuration, the managed identity token
/// provider, and the SQL client that opens per-request sessions.
///
/// Cheap to clone. The configuration rides in an `Arc`, and token provider
/// clones share one cache slot.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: TokenProvider,
    pub sql: SqlClient,
}

impl AppState {
    /// Creates application state from the given configuration, wiring the
    /// token provider into the SQL client so both share one token cache.
    pub fn new(config: AppConfig) -> Self {
        let identity = TokenProvider::new(config.identity_endpoint.clone());
        let sql = SqlClient::new(SessionDescriptor::from_config(&config), identity.clone());
        Self {
            config: Arc::new(config),
            identity,
            sql,
        }
    }
}
