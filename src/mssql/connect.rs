//! Session descriptors, token framing, and connection error classification.

use tiberius::error::Error as TdsError;
use tiberius::{AuthMethod, Config, EncryptionLevel};

use crate::config::{AppConfig, SQL_PORT};
use crate::identity::{AccessToken, AuthError};

/// An access token framed for the TDS login authentication attribute:
/// a 4-byte little-endian byte count followed by the token text encoded
/// as UTF-16LE. The server validates this exact layout during login.
pub struct TokenAttribute {
    token: AccessToken,
    framed: Vec<u8>,
}

impl TokenAttribute {
    pub fn new(token: AccessToken) -> Self {
        let utf16: Vec<u8> = token
            .secret()
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        let mut framed = Vec::with_capacity(4 + utf16.len());
        framed.extend_from_slice(&(utf16.len() as u32).to_le_bytes());
        framed.extend_from_slice(&utf16);
        Self { token, framed }
    }

    /// Total framed length: 4 bytes of prefix plus two bytes per code unit
    pub fn framed_len(&self) -> usize {
        self.framed.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.framed
    }

    /// Hand the token to the driver, which presents the framed layout to
    /// the server during login.
    pub fn into_auth_method(self) -> AuthMethod {
        AuthMethod::aad_token(self.token.secret())
    }
}

impl std::fmt::Debug for TokenAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAttribute")
            .field("framed_len", &self.framed.len())
            .finish()
    }
}

/// Everything needed to open a session except the credential.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub server: String,
    pub database: String,
    pub port: u16,
    pub application_name: String,
}

impl SessionDescriptor {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            server: config.sql_server.clone(),
            database: config.sql_database.clone(),
            port: SQL_PORT,
            application_name: config.app_name.clone(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    pub(crate) fn to_tds_config(&self, auth: AuthMethod) -> Config {
        let mut config = Config::new();
        config.host(&self.server);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(auth);
        config.encryption(EncryptionLevel::Required);
        // The private endpoint presents the gateway certificate, which does
        // not match the server hostname.
        config.trust_cert();
        config.application_name(&self.application_name);
        config
    }
}

/// Best-effort classification of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Certificate,
    Authentication,
    NetworkPolicy,
    Unknown,
}

impl ConnectionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Authentication => "authentication",
            Self::NetworkPolicy => "network_policy",
            Self::Unknown => "unknown",
        }
    }

    pub fn suggestion(self) -> Option<&'static str> {
        match self {
            Self::Certificate => {
                Some("SSL certificate validation failed. TrustServerCertificate=yes is set.")
            }
            Self::Authentication => Some(
                "Managed Identity may not have SQL permissions. Check Azure AD admin assignment.",
            ),
            Self::NetworkPolicy => {
                Some("SQL Server has public access disabled. Ensure using private endpoint.")
            }
            Self::Unknown => None,
        }
    }
}

/// Classify a driver error. Typed variants are matched first; the substring
/// checks on the rendered message are a diagnostic overlay that degrades to
/// `Unknown` when driver message text drifts.
pub fn classify(err: &TdsError) -> ConnectionErrorKind {
    match err {
        TdsError::Tls(_) => ConnectionErrorKind::Certificate,
        // 18456 is the server's login-failed error, 47073 its
        // public-network-access-denied error.
        TdsError::Server(e) if e.code() == 18456 => ConnectionErrorKind::Authentication,
        TdsError::Server(e) if e.code() == 47073 => ConnectionErrorKind::NetworkPolicy,
        _ => classify_message(&err.to_string()),
    }
}

fn classify_message(message: &str) -> ConnectionErrorKind {
    if message.contains("certificate verify failed") {
        ConnectionErrorKind::Certificate
    } else if message.contains("Login failed") || message.to_lowercase().contains("authentication")
    {
        ConnectionErrorKind::Authentication
    } else if message.contains("denied because Deny Public Network Access") {
        ConnectionErrorKind::NetworkPolicy
    } else {
        ConnectionErrorKind::Unknown
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Identity(#[from] AuthError),
    #[error("connection to {server} timed out")]
    Timeout { server: String, database: String },
    #[error("database connection failed: {message}")]
    Driver {
        kind: ConnectionErrorKind,
        message: String,
        server: String,
        database: String,
    },
}
