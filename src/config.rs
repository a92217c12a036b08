//! Environment-driven configuration and service constants.
//!
//! `AppConfig` is the root settings struct, loaded from environment
//! variables with deployment defaults for anything unset. The constants
//! cover the instance metadata service, token lifetime handling, and SQL
//! Server connection behavior.

// =============================================================================
// Managed Identity Token Exchange
// =============================================================================
// Token acquisition goes through the Azure Instance Metadata Service (IMDS),
// a link-local endpoint that is only reachable from inside the platform.
//
// Reference:
// - https://learn.microsoft.com/en-us/entra/identity/managed-identities-azure-resources/how-to-use-vm-token

/// Default token endpoint (overridable via IDENTITY_ENDPOINT)
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// IMDS API version pinned for the token request
pub const IMDS_API_VERSION: &str = "2018-02-01";

/// Resource (audience) for tokens that Azure SQL accepts
pub const SQL_TOKEN_RESOURCE: &str = "https://database.windows.net/";

/// Timeout in seconds for a single token request to the metadata service
pub const TOKEN_FETCH_TIMEOUT_SECS: u64 = 10;

/// Seconds subtracted from the reported lifetime before a cached token is
/// considered expired, so a token is never presented near the end of its life
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 300;

/// Lifetime in seconds assumed when the metadata service omits `expires_in`
pub const TOKEN_EXPIRES_IN_FALLBACK_SECS: u64 = 3599;

// =============================================================================
// SQL Server Connection
// =============================================================================

/// TDS port for Azure SQL
pub const SQL_PORT: u16 = 1433;

/// Timeout in seconds covering TCP connect plus TDS handshake and login
pub const SQL_CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// HTTP Server
// =============================================================================

/// Bind address for the HTTP listener (all interfaces, container-style)
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default HTTP port when PORT is not set
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// =============================================================================
// Diagnostics
// =============================================================================

/// Maximum characters of server version / sample quote text reported by the
/// connection diagnostic endpoint
pub const DIAGNOSTIC_PREVIEW_LIMIT: usize = 100;

// =============================================================================
// Default Environment Values
// =============================================================================

/// Default SQL Server hostname (private endpoint of the provisioned instance)
pub const DEFAULT_SQL_SERVER: &str = "sql-quote-05d126e2.privatelink.database.windows.net";

/// Default database name
pub const DEFAULT_SQL_DATABASE: &str = "quotedb";

/// Default service name used in payloads and the TDS application name
pub const DEFAULT_APP_NAME: &str = "quote-app";

/// Log filter applied when neither the CLI flag nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "epigram=debug,tower_http=debug";

/// Log format used when LOG_FORMAT is not set
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQL Server hostname
    pub sql_server: String,
    /// Database name
    pub sql_database: String,
    /// Service name reported in payloads and as the TDS application name
    pub app_name: String,
    /// Debug mode: error payloads include backtrace-level detail
    pub debug: bool,
    /// HTTP listen port
    pub port: u16,
    /// Token endpoint of the identity service
    pub identity_endpoint: String,
    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format, "text" (human-readable) or "json" (structured)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment, falling back to the
    /// defaults of the provisioned deployment for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        Ok(Self {
            sql_server: std::env::var("SQL_SERVER")
                .unwrap_or_else(|_| DEFAULT_SQL_SERVER.to_string()),
            sql_database: std::env::var("SQL_DATABASE")
                .unwrap_or_else(|_| DEFAULT_SQL_DATABASE.to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            // FLASK_DEBUG is the variable name the deployment manifests set;
            // renaming it would break existing environments.
            debug: parse_debug(&std::env::var("FLASK_DEBUG").unwrap_or_default()),
            port,
            identity_endpoint: std::env::var("IDENTITY_ENDPOINT")
                .unwrap_or_else(|_| IMDS_TOKEN_ENDPOINT.to_string()),
            logging: LoggingConfig {
                format: std::env::var("LOG_FORMAT")
                    .unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_string()),
            },
        })
    }

    /// Address the HTTP listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", DEFAULT_BIND_HOST, self.port)
    }

    /// Whether the configured SQL Server hostname goes through a private
    /// endpoint rather than the public gateway
    pub fn is_private_endpoint(&self) -> bool {
        self.sql_server.contains("privatelink")
    }
}

fn parse_debug(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.parse::<u16>().map_err(|_| {
        ConfigError::Validation(format!("PORT must be a TCP port number, got {raw:?}"))
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Validation(String),
}
