//! SQL Server access over TDS.
//!
//! `SqlClient` opens short-lived sessions against Azure SQL, authenticating
//! with a managed identity token passed as an out-of-band login attribute
//! instead of a username/password. There is no pool: every request opens a
//! session and releases it before the handler returns. `SqlSession` owns the
//! driver connection, so the connection is released on every exit path;
//! `close` additionally performs the graceful logout.

pub mod connect;

pub use connect::{ConnectionError, ConnectionErrorKind, SessionDescriptor, TokenAttribute};

use std::time::Duration;

use tiberius::error::Error as TdsError;
use tiberius::{Client, Row};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::SQL_CONNECT_TIMEOUT_SECS;
use crate::identity::TokenProvider;

const RANDOM_QUOTE_SQL: &str = "SELECT TOP 1 quote, author FROM quotes ORDER BY NEWID()";
const PING_SQL: &str = "SELECT 1";
const VERSION_SQL: &str = "SELECT @@VERSION";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM quotes";
const SAMPLE_QUOTE_SQL: &str = "SELECT TOP 1 quote, author FROM quotes";

type TdsClient = Client<Compat<TcpStream>>;

/// A row from the quotes table.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub text: String,
    pub author: String,
}

/// A failed statement, carrying the server error code and state when the
/// server reported one.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct QueryError {
    pub(crate) message: String,
    /// Server error number, if the failure came from the server
    pub(crate) code: Option<u32>,
    /// Server error state. TDS does not carry an ODBC-style SQLSTATE
    /// string; the numeric state is the nearest equivalent.
    pub(crate) state: Option<u8>,
}

impl From<TdsError> for QueryError {
    fn from(err: TdsError) -> Self {
        match &err {
            TdsError::Server(e) => Self {
                message: e.message().to_string(),
                code: Some(e.code()),
                state: Some(e.state()),
            },
            _ => Self {
                message: err.to_string(),
                code: None,
                state: None,
            },
        }
    }
}

/// Opens authenticated sessions against the configured server.
#[derive(Debug, Clone)]
pub struct SqlClient {
    descriptor: SessionDescriptor,
    identity: TokenProvider,
}

impl SqlClient {
    pub fn new(descriptor: SessionDescriptor, identity: TokenProvider) -> Self {
        Self {
            descriptor,
            identity,
        }
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Open a new session: fetch a token, frame it as the login attribute,
    /// then run TCP connect plus TDS handshake under the connect timeout.
    pub async fn open_session(&self) -> Result<SqlSession, ConnectionError> {
        let token = self.identity.get_token().await?;
        let attribute = TokenAttribute::new(token);
        debug!(
            server = %self.descriptor.server,
            framed_len = attribute.framed_len(),
            "connecting with framed token attribute"
        );

        let config = self.descriptor.to_tds_config(attribute.into_auth_method());
        let addr = self.descriptor.addr();

        let connect = async {
            let tcp = TcpStream::connect(&addr).await.map_err(TdsError::from)?;
            tcp.set_nodelay(true).map_err(TdsError::from)?;
            Client::connect(config, tcp.compat_write()).await
        };

        let client = timeout(Duration::from_secs(SQL_CONNECT_TIMEOUT_SECS), connect)
            .await
            .map_err(|_| {
                warn!(server = %self.descriptor.server, "database connection timed out");
                ConnectionError::Timeout {
                    server: self.descriptor.server.clone(),
                    database: self.descriptor.database.clone(),
                }
            })?
            .map_err(|e| self.driver_error(e))?;

        info!(
            server = %self.descriptor.server,
            database = %self.descriptor.database,
            "database session established"
        );
        Ok(SqlSession { client })
    }

    fn driver_error(&self, err: TdsError) -> ConnectionError {
        let kind = connect::classify(&err);
        warn!(kind = kind.as_str(), error = %err, "database connection failed");
        ConnectionError::Driver {
            kind,
            message: err.to_string(),
            server: self.descriptor.server.clone(),
            database: self.descriptor.database.clone(),
        }
    }
}

/// A live database session executing the fixed statement set.
pub struct SqlSession {
    client: TdsClient,
}

impl SqlSession {
    /// Random row from the quotes table; `None` when the table is empty
    pub async fn random_quote(&mut self) -> Result<Option<Quote>, QueryError> {
        let row = self
            .client
            .simple_query(RANDOM_QUOTE_SQL)
            .await?
            .into_row()
            .await?;
        row.as_ref().map(quote_from_row).transpose()
    }

    /// Trivial round trip proving the session can execute statements
    pub async fn ping(&mut self) -> Result<(), QueryError> {
        self.client.simple_query(PING_SQL).await?.into_row().await?;
        Ok(())
    }

    pub async fn server_version(&mut self) -> Result<Option<String>, QueryError> {
        let row = self
            .client
            .simple_query(VERSION_SQL)
            .await?
            .into_row()
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<&str, _>(0)?.map(str::to_string)),
            None => Ok(None),
        }
    }

    pub async fn quote_count(&mut self) -> Result<i32, QueryError> {
        let row = self
            .client
            .simple_query(COUNT_SQL)
            .await?
            .into_row()
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i32, _>(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// First row of the quotes table, for diagnostics
    pub async fn sample_quote(&mut self) -> Result<Option<Quote>, QueryError> {
        let row = self
            .client
            .simple_query(SAMPLE_QUOTE_SQL)
            .await?
            .into_row()
            .await?;
        row.as_ref().map(quote_from_row).transpose()
    }

    /// Graceful logout. Dropping the session without calling this still
    /// releases the connection, skipping the logout exchange.
    pub async fn close(self) -> Result<(), QueryError> {
        self.client.close().await?;
        Ok(())
    }
}

fn quote_from_row(row: &Row) -> Result<Quote, QueryError> {
    Ok(Quote {
        text: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
        author: row.try_get::<&str, _>(1)?.unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthError;
    use axum::routing::get;
    use axum::Router;

    async fn mock_identity() -> TokenProvider {
        let app = Router::new().route(
            "/token",
            get(|| async { r#"{"access_token":"test-token","expires_in":"3599"}"# }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TokenProvider::new(format!("http://{}:{}/token", addr.ip(), addr.port()))
    }

    fn unreachable_descriptor() -> SessionDescriptor {
        // Port 1 refuses connections immediately.
        SessionDescriptor {
            server: "127.0.0.1".to_string(),
            database: "quotedb".to_string(),
            port: 1,
            application_name: "quote-app".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_session_against_unreachable_server() {
        let client = SqlClient::new(unreachable_descriptor(), mock_identity().await);
        match client.open_session().await {
            Err(ConnectionError::Driver {
                kind,
                server,
                database,
                ..
            }) => {
                assert_eq!(kind, ConnectionErrorKind::Unknown);
                assert_eq!(server, "127.0.0.1");
                assert_eq!(database, "quotedb");
            }
            other => panic!("expected Driver error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_open_session_wraps_identity_failure() {
        let identity = TokenProvider::new("http://127.0.0.1:1/token");
        let client = SqlClient::new(unreachable_descriptor(), identity);
        match client.open_session().await {
            Err(ConnectionError::Identity(AuthError::Unreachable(_))) => {}
            other => panic!("expected Identity error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_query_error_from_protocol_error() {
        let err = QueryError::from(TdsError::Protocol("unexpected token stream".into()));
        assert_eq!(err.code, None);
        assert_eq!(err.state, None);
        assert!(err.to_string().contains("unexpected token stream"));
    }
}
