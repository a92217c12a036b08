//! Managed identity token acquisition.
//!
//! Exchanges the platform identity for a short-lived Azure SQL access token
//! via the instance metadata service. Tokens are held in a single-slot cache
//! guarded by a mutex; the slot is overwritten on every successful fetch and
//! a token is never returned once inside the safety margin of its lifetime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{
    IMDS_API_VERSION, SQL_TOKEN_RESOURCE, TOKEN_EXPIRES_IN_FALLBACK_SECS,
    TOKEN_EXPIRY_MARGIN_SECS, TOKEN_FETCH_TIMEOUT_SECS,
};

/// A bearer token accepted by Azure SQL.
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    secret: String,
}

impl AccessToken {
    pub(crate) fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Character count of the token text, reported by diagnostics in place
    /// of the token itself
    pub fn len(&self) -> usize {
        self.secret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

impl CachedToken {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Token response from the metadata service. The live service reports
/// `expires_in` as a JSON string, so the field accepts number or string;
/// a string that holds no number fails the decode.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    expires_in: Option<u64>,
}

fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s.parse().map(Some).map_err(|_| {
            serde::de::Error::custom(format!("expires_in is not a number: {s:?}"))
        }),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request to the identity service timed out")]
    Timeout,
    #[error("identity service unreachable: {0}")]
    Unreachable(String),
    #[error("token request failed: {0}")]
    Transport(String),
}

/// Fetches and caches managed identity access tokens.
///
/// Cloning is cheap; clones share the cache slot. The cache lock is never
/// held across the network fetch, so concurrent callers racing past an
/// expired entry each fetch independently and the last writer wins.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    cache: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, Duration::from_secs(TOKEN_FETCH_TIMEOUT_SECS))
    }

    fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Return a live token, fetching a fresh one from the identity service
    /// if the cached entry is missing or past its expiry.
    ///
    /// A failed fetch leaves the cache slot untouched.
    pub async fn get_token(&self) -> Result<AccessToken, AuthError> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_live(Instant::now()) {
                    debug!("using cached access token");
                    return Ok(cached.token.clone());
                }
            }
        }

        let fetched_at = Instant::now();
        let (token, expires_in) = self.fetch().await?;
        let expires_at =
            fetched_at + Duration::from_secs(expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));
        info!(
            token_length = token.len(),
            expires_in, "acquired access token from identity service"
        );

        let mut cache = self.cache.lock().await;
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn fetch(&self) -> Result<(AccessToken, u64), AuthError> {
        debug!(endpoint = %self.endpoint, "requesting access token");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("api-version", IMDS_API_VERSION),
                ("resource", SQL_TOKEN_RESOURCE),
            ])
            .header("Metadata", "true")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Transport(format!(
                "identity service returned {status}: {body}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(format!("invalid token response: {e}")))?;

        let expires_in = body.expires_in.unwrap_or(TOKEN_EXPIRES_IN_FALLBACK_SECS);
        Ok((AccessToken::new(body.access_token), expires_in))
    }
}

fn classify_request_error(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else if err.is_connect() {
        AuthError::Unreachable(err.to_string())
    } else {
        AuthError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::Router;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Starts a server running locally and returns its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}:{}", addr.ip(), addr.port())
    }

    fn token_body(secret: &str, expires_in: &str) -> String {
        format!(r#"{{"access_token":"{secret}","expires_in":{expires_in},"token_type":"Bearer","resource":"https://database.windows.net/"}}"#)
    }

    #[tokio::test]
    async fn test_fetch_requires_metadata_header() {
        let app = Router::new().route(
            "/token",
            get(|headers: HeaderMap| async move {
                if headers.get("metadata").map(|v| v.as_bytes()) != Some(b"true") {
                    return (StatusCode::BAD_REQUEST, String::new());
                }
                (StatusCode::OK, token_body("tok-1", "\"3599\""))
            }),
        );
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        let token = provider.get_token().await.unwrap();
        assert_eq!(token.secret(), "tok-1");
        assert_eq!(token.len(), 5);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_refetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/token",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    token_body("tok-cached", "\"3599\"")
                }
            }),
        );
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        let first = provider.get_token().await.unwrap();
        let second = provider.get_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let app = Router::new().route("/token", get(|| async { token_body("tok-new", "3599") }));
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        {
            let mut cache = provider.cache.lock().await;
            *cache = Some(CachedToken {
                token: AccessToken::new("tok-stale"),
                expires_at: Instant::now() - Duration::from_secs(1),
            });
        }

        let token = provider.get_token().await.unwrap();
        assert_eq!(token.secret(), "tok-new");
    }

    #[tokio::test]
    async fn test_expiry_margin_applied() {
        let app = Router::new().route("/token", get(|| async { token_body("tok", "\"3599\"") }));
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        let before = Instant::now();
        provider.get_token().await.unwrap();
        let after = Instant::now();

        let cache = provider.cache.lock().await;
        let entry = cache.as_ref().unwrap();
        // expires_at is anchored at fetch time, somewhere between the two
        // readings, with the 300s margin already subtracted.
        assert!(entry.expires_at - after <= Duration::from_secs(3599 - 300));
        assert!(entry.expires_at - before >= Duration::from_secs(3599 - 300));
    }

    #[tokio::test]
    async fn test_missing_expires_in_uses_fallback() {
        let app = Router::new()
            .route("/token", get(|| async { r#"{"access_token":"tok"}"# }));
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        let before = Instant::now();
        provider.get_token().await.unwrap();
        let after = Instant::now();

        let cache = provider.cache.lock().await;
        let entry = cache.as_ref().unwrap();
        // Fallback lifetime 3599s, minus the 300s margin, anchored at a
        // fetch time between the two readings.
        assert!(entry.expires_at - after <= Duration::from_secs(3599 - 300));
        assert!(entry.expires_at - before >= Duration::from_secs(3599 - 300));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_classified() {
        // Nothing listens on port 1; connects are refused immediately.
        let provider = TokenProvider::new("http://127.0.0.1:1/token");
        match provider.get_token().await {
            Err(AuthError::Unreachable(_)) => {}
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_endpoint_classified_as_timeout() {
        let app = Router::new().route(
            "/token",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                token_body("tok", "3599")
            }),
        );
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::with_timeout(endpoint, Duration::from_millis(50));
        match provider.get_token().await {
            Err(AuthError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_surfaced_as_transport() {
        let app = Router::new().route("/token", get(|| async { "not a token response" }));
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        match provider.get_token().await {
            Err(AuthError::Transport(msg)) => {
                assert!(msg.contains("invalid token response"), "{msg}")
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_numeric_expires_in_rejected() {
        // A present but unparseable lifetime must fail the fetch, not be
        // silently replaced by the fallback lifetime.
        let app = Router::new().route("/token", get(|| async { token_body("tok", "\"soon\"") }));
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        match provider.get_token().await {
            Err(AuthError::Transport(msg)) => {
                assert!(msg.contains("expires_in"), "{msg}")
            }
            other => panic!("expected Transport, got {other:?}"),
        }

        let cache = provider.cache.lock().await;
        assert!(cache.is_none());
    }

    #[tokio::test]
    async fn test_rejection_surfaced_as_transport() {
        let app = Router::new().route(
            "/token",
            get(|| async { (StatusCode::BAD_REQUEST, "no identity assigned") }),
        );
        let endpoint = format!("{}/token", serve(app).await);

        let provider = TokenProvider::new(endpoint);
        match provider.get_token().await {
            Err(AuthError::Transport(msg)) => assert!(msg.contains("no identity assigned")),
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_preserves_cache_entry() {
        let provider = TokenProvider::new("http://127.0.0.1:1/token");
        let stale_expiry = Instant::now() - Duration::from_secs(1);
        {
            let mut cache = provider.cache.lock().await;
            *cache = Some(CachedToken {
                token: AccessToken::new("tok-stale"),
                expires_at: stale_expiry,
            });
        }

        assert!(provider.get_token().await.is_err());

        let cache = provider.cache.lock().await;
        let entry = cache.as_ref().unwrap();
        assert_eq!(entry.token.secret(), "tok-stale");
        assert_eq!(entry.expires_at, stale_expiry);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AccessToken::new("secret-token-value");
        let got = format!("{token:?}");
        assert!(!got.contains("secret-token-value"), "{got}");
        assert!(got.contains("[redacted]"), "{got}");
    }
}
