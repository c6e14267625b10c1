//! Connection establishment with cookie fallback.
//!
//! `ITERM2_COOKIE` is set in every iTerm2 session, but in practice the
//! cookie stops working after its first successful use. A rejected
//! pre-shared cookie is therefore never fatal: we ask for a fresh pair once
//! and try again. Nothing is retried beyond that.

use super::auth::{parse_credentials, Authorizer};
use super::headers::{HandshakeHeaders, LIBRARY_VERSION};
use crate::error::{Result, RpcError};
use crate::transport::Connector;

/// Environment variable holding the pre-shared cookie.
pub const COOKIE_ENV_VAR: &str = "ITERM2_COOKIE";

/// Application name used when the caller does not provide one.
pub const DEFAULT_APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Inputs to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Name registered with iTerm2 for this client.
    pub app_name: Option<String>,
    /// Pre-shared cookie to try first.
    pub cookie: Option<String>,
    /// Library identifier announced in the headers.
    pub library_version: String,
}

impl HandshakeConfig {
    /// Config with the cookie taken from `ITERM2_COOKIE`, if set and non-empty.
    pub fn from_env(app_name: Option<String>) -> Self {
        Self {
            app_name,
            cookie: std::env::var(COOKIE_ENV_VAR).ok().filter(|c| !c.is_empty()),
            library_version: LIBRARY_VERSION.to_string(),
        }
    }

    fn base_headers(&self) -> HandshakeHeaders {
        let headers = HandshakeHeaders::new(self.library_version.clone());
        match &self.app_name {
            Some(name) => headers.advisory_name(name.clone()),
            None => headers,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            app_name: None,
            cookie: None,
            library_version: LIBRARY_VERSION.to_string(),
        }
    }
}

/// Open a transport, falling back to interactive authorization once.
///
/// # Errors
///
/// Returns [`RpcError::Handshake`] if authorization fails, if its reply is
/// not exactly a cookie and a key, or if the connection with the fresh pair
/// is refused.
pub async fn establish<C, A>(
    connector: &C,
    authorizer: &A,
    config: &HandshakeConfig,
) -> Result<(C::Sink, C::Source)>
where
    C: Connector + ?Sized,
    A: Authorizer + ?Sized,
{
    let base = config.base_headers();

    if let Some(cookie) = config.cookie.as_deref().filter(|c| !c.is_empty()) {
        match connector.connect(&base.clone().cookie(cookie)).await {
            Ok(transport) => {
                tracing::debug!("connected with pre-shared cookie");
                return Ok(transport);
            }
            Err(e) => {
                tracing::debug!(error = %e, "pre-shared cookie rejected, requesting a fresh one");
            }
        }
    }

    let app_name = config.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME);
    let raw = authorizer
        .request_cookie_and_key(app_name)
        .await
        .map_err(into_handshake)?;
    let credentials = parse_credentials(&raw)?;

    let headers = base.cookie(credentials.cookie).key(credentials.key);
    let transport = connector.connect(&headers).await.map_err(into_handshake)?;
    tracing::debug!(app_name, "connected with negotiated cookie");
    Ok(transport)
}

fn into_handshake(err: RpcError) -> RpcError {
    match err {
        RpcError::Handshake(_) => err,
        other => RpcError::Handshake(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxFuture, MemoryConnector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedAuthorizer {
        reply: std::result::Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl FixedAuthorizer {
        fn new(reply: std::result::Result<&'static str, &'static str>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Authorizer for FixedAuthorizer {
        fn request_cookie_and_key<'a>(&'a self, _app: &'a str) -> BoxFuture<'a, Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply;
            Box::pin(async move {
                reply
                    .map(str::to_string)
                    .map_err(|e| RpcError::Handshake(e.to_string()))
            })
        }
    }

    fn config(cookie: Option<&str>) -> HandshakeConfig {
        HandshakeConfig {
            app_name: Some("test-app".into()),
            cookie: cookie.map(str::to_string),
            library_version: "rust test".into(),
        }
    }

    #[tokio::test]
    async fn test_preshared_cookie_accepted_skips_authorizer() {
        let (connector, _acceptor) = MemoryConnector::new();
        let auth = FixedAuthorizer::new(Ok("x y"));

        establish(&connector, &auth, &config(Some("env-cookie")))
            .await
            .unwrap();

        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
        let attempts = connector.attempts();
        let attempts = attempts.lock();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].cookie_value(), Some("env-cookie"));
        assert_eq!(attempts[0].key_value(), None);
    }

    #[tokio::test]
    async fn test_no_cookie_goes_straight_to_authorizer() {
        let (connector, _acceptor) = MemoryConnector::new();
        let auth = FixedAuthorizer::new(Ok("fresh key"));

        establish(&connector, &auth, &config(None)).await.unwrap();

        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        let attempts = connector.attempts();
        assert_eq!(attempts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_authorizer_failure_is_handshake_error() {
        let (connector, _acceptor) = MemoryConnector::new();
        let auth = FixedAuthorizer::new(Err("user said no"));

        let err = establish(&connector, &auth, &config(None)).await.unwrap_err();
        assert!(matches!(err, RpcError::Handshake(ref m) if m.contains("user said no")));
        assert!(connector.attempts().lock().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_pair_rejected_is_not_retried() {
        let (connector, _acceptor) = MemoryConnector::with_policy(|_| Err("nope".into()));
        let auth = FixedAuthorizer::new(Ok("c k"));

        let err = establish(&connector, &auth, &config(Some("stale")))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Handshake(_)));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(connector.attempts().lock().len(), 2);
    }

    #[test]
    fn test_base_headers_carry_app_name() {
        let pairs = config(None).base_headers().to_pairs();
        assert!(pairs.contains(&("x-iterm2-advisory-name", "test-app".to_string())));
        assert!(pairs.contains(&("x-iterm2-library-version", "rust test".to_string())));
    }
}
