//! Control plane module - authentication and connection handshake.
//!
//! Everything that happens before the first RPC goes over the wire lives
//! here:
//!
//! 1. Build the handshake headers (library version, auth UI suppression,
//!    cookie, key)
//! 2. Try the pre-shared cookie from the environment, if any
//! 3. On rejection, ask iTerm2 for a fresh cookie/key pair through the
//!    [`Authorizer`] and try exactly once more
//!
//! # Example
//!
//! ```ignore
//! use iterm2_client::control::{establish, HandshakeConfig, OsascriptAuthorizer};
//! use iterm2_client::transport::UnixWebSocketConnector;
//!
//! let config = HandshakeConfig::from_env(Some("my-plugin".into()));
//! let connector = UnixWebSocketConnector::from_home()?;
//! let (sink, source) = establish(&connector, &OsascriptAuthorizer, &config).await?;
//! ```

mod auth;
mod handshake;
mod headers;

pub use auth::{parse_credentials, Authorizer, Credentials, OsascriptAuthorizer};
pub use handshake::{establish, HandshakeConfig, COOKIE_ENV_VAR, DEFAULT_APP_NAME};
pub use headers::{HandshakeHeaders, LIBRARY_VERSION};
