//! Credential negotiation with iTerm2.
//!
//! When no usable cookie is available, iTerm2 hands out a fresh
//! cookie/key pair through AppleScript:
//!
//! ```text
//! tell application "iTerm2" to request cookie and key for app named "<name>"
//! ```
//!
//! The reply is two whitespace-separated tokens. Anything else is treated as
//! a failed negotiation.

use tokio::process::Command;

use crate::error::{Result, RpcError};
use crate::transport::BoxFuture;

/// A negotiated cookie and session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication cookie.
    pub cookie: String,
    /// Session key paired with the cookie.
    pub key: String,
}

/// Source of fresh credentials.
pub trait Authorizer: Send + Sync {
    /// Ask for a new cookie and key on behalf of `app_name`, returning the
    /// raw reply.
    fn request_cookie_and_key<'a>(&'a self, app_name: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Split a raw authorization reply into exactly two tokens.
///
/// # Errors
///
/// Returns a `Handshake` error quoting the reply if it does not hold exactly
/// two tokens.
pub fn parse_credentials(raw: &str) -> Result<Credentials> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    match fields.as_slice() {
        [cookie, key] => Ok(Credentials {
            cookie: (*cookie).to_string(),
            key: (*key).to_string(),
        }),
        _ => Err(RpcError::Handshake(format!(
            "incorrect field format: expected cookie and key, got {} token(s) in {:?}",
            fields.len(),
            raw
        ))),
    }
}

/// Requests credentials by running `osascript` (macOS only).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsascriptAuthorizer;

impl OsascriptAuthorizer {
    fn script(app_name: &str) -> String {
        format!(
            "tell application \"iTerm2\" to request cookie and key for app named {:?}",
            app_name
        )
    }
}

impl Authorizer for OsascriptAuthorizer {
    fn request_cookie_and_key<'a>(&'a self, app_name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let output = Command::new("osascript")
                .arg("-e")
                .arg(Self::script(app_name))
                .output()
                .await
                .map_err(|e| RpcError::Handshake(format!("AppleScript/tell: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(RpcError::Handshake(format!(
                    "AppleScript/tell: {} ({})",
                    stderr.trim(),
                    output.status
                )));
            }

            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        })
    }
}
