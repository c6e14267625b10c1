//! WebSocket transport over the iTerm2 Unix domain socket.
//!
//! iTerm2 exposes its automation API as a WebSocket server listening on a
//! private Unix socket. The HTTP upgrade carries the authentication headers
//! and must request the `api.iterm2.com` subprotocol.
//!
//! # Example
//!
//! ```ignore
//! use iterm2_client::transport::UnixWebSocketConnector;
//!
//! let connector = UnixWebSocketConnector::from_home()?;
//! let (sink, source) = connector.connect(&headers).await?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use super::{BoxFuture, Connector, MessageSink, MessageSource};
use crate::control::HandshakeHeaders;
use crate::error::{Result, RpcError};

/// Default time allowed for socket connect plus HTTP upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

/// WebSocket subprotocol spoken by the iTerm2 API server.
pub const SUBPROTOCOL: &str = "api.iterm2.com";

/// Socket location relative to the user's home directory.
const SOCKET_SUFFIX: &str = "Library/Application Support/iTerm2/private/socket";

/// Origin sent with the upgrade request.
const ORIGIN: &str = "ws://localhost/";

type Ws = WebSocketStream<UnixStream>;

/// Path of the iTerm2 API socket for the current user.
///
/// # Errors
///
/// Returns a `Handshake` error if `HOME` is not set.
pub fn default_socket_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| RpcError::Handshake("cannot locate home directory: HOME is not set".into()))?;
    Ok(PathBuf::from(home).join(SOCKET_SUFFIX))
}

/// Connects to iTerm2 by dialing a Unix socket and upgrading to WebSocket.
#[derive(Debug, Clone)]
pub struct UnixWebSocketConnector {
    socket_path: PathBuf,
    handshake_timeout: Duration,
}

impl UnixWebSocketConnector {
    /// Connector for an explicit socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Connector for the default per-user socket path.
    pub fn from_home() -> Result<Self> {
        Ok(Self::new(default_socket_path()?))
    }

    /// Override the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Socket path this connector dials.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn dial(&self, headers: &HandshakeHeaders) -> Result<Ws> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            RpcError::Handshake(format!(
                "error connecting to iTerm2 socket {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let request = build_upgrade_request(headers)?;
        let (ws, _response) = tokio_tungstenite::client_async(request, stream)
            .await
            .map_err(upgrade_error)?;
        Ok(ws)
    }
}

impl Connector for UnixWebSocketConnector {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn connect<'a>(
        &'a self,
        headers: &'a HandshakeHeaders,
    ) -> BoxFuture<'a, Result<(WebSocketSink, WebSocketSource)>> {
        Box::pin(async move {
            let ws = tokio::time::timeout(self.handshake_timeout, self.dial(headers))
                .await
                .map_err(|_| {
                    RpcError::Handshake(format!(
                        "handshake timed out after {:?}",
                        self.handshake_timeout
                    ))
                })??;

            tracing::debug!(path = %self.socket_path.display(), "websocket connected");

            let (sink, source) = ws.split();
            Ok((WebSocketSink { inner: sink }, WebSocketSource { inner: source }))
        })
    }
}

/// Build the HTTP upgrade request carrying the handshake headers.
fn build_upgrade_request(headers: &HandshakeHeaders) -> Result<Request<()>> {
    let mut request = "ws://localhost/"
        .into_client_request()
        .map_err(|e| RpcError::Handshake(format!("invalid upgrade request: {}", e)))?;

    let map = request.headers_mut();
    map.insert("origin", HeaderValue::from_static(ORIGIN));
    map.insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));

    for (name, value) in headers.to_pairs() {
        let value = HeaderValue::from_str(&value).map_err(|e| {
            RpcError::Handshake(format!("invalid value for header {}: {}", name, e))
        })?;
        map.insert(name, value);
    }

    Ok(request)
}

/// Turn an upgrade failure into a handshake error, keeping the server's
/// response body when it sent one.
fn upgrade_error(err: tungstenite::Error) -> RpcError {
    match err {
        tungstenite::Error::Http(response) => {
            let body = match response.body() {
                Some(body) => String::from_utf8_lossy(body).into_owned(),
                None => String::new(),
            };
            RpcError::Handshake(format!(
                "error connecting to iTerm2: HTTP {} - body: {}",
                response.status(),
                body
            ))
        }
        other => RpcError::Handshake(format!("error connecting to iTerm2: {}", other)),
    }
}

/// Write half of the WebSocket transport.
pub struct WebSocketSink {
    inner: SplitSink<Ws, Message>,
}

impl MessageSink for WebSocketSink {
    fn send(&mut self, message: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .send(Message::Binary(message))
                .await
                .map_err(|e| RpcError::Write(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.inner.close().await {
                Ok(())
                | Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(e) => Err(RpcError::Write(e.to_string())),
            }
        })
    }
}

/// Read half of the WebSocket transport.
pub struct WebSocketSource {
    inner: SplitStream<Ws>,
}

impl MessageSource for WebSocketSource {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await? {
                    Ok(Message::Binary(data)) => return Some(Ok(data)),
                    Ok(Message::Text(text)) => {
                        return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())))
                    }
                    Ok(Message::Close(_)) => return None,
                    // Control frames are answered by tungstenite itself.
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                        continue
                    }
                    Err(tungstenite::Error::ConnectionClosed)
                    | Err(tungstenite::Error::AlreadyClosed) => return None,
                    Err(e) => return Some(Err(RpcError::Transport(e.to_string()))),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_request_headers() {
        let headers = HandshakeHeaders::new("rust 0.1.0")
            .cookie("c00kie")
            .key("k3y")
            .advisory_name("demo");

        let request = build_upgrade_request(&headers).unwrap();
        let map = request.headers();

        assert_eq!(map["origin"], ORIGIN);
        assert_eq!(map["sec-websocket-protocol"], SUBPROTOCOL);
        assert_eq!(map["x-iterm2-library-version"], "rust 0.1.0");
        assert_eq!(map["x-iterm2-disable-auth-ui"], "true");
        assert_eq!(map["x-iterm2-cookie"], "c00kie");
        assert_eq!(map["x-iterm2-key"], "k3y");
        assert_eq!(map["x-iterm2-advisory-name"], "demo");
    }

    #[test]
    fn test_upgrade_request_rejects_bad_header_value() {
        let headers = HandshakeHeaders::new("rust").cookie("bad\nvalue");
        let result = build_upgrade_request(&headers);
        assert!(matches!(result, Err(RpcError::Handshake(_))));
    }

    #[test]
    fn test_socket_path_suffix() {
        let connector = UnixWebSocketConnector::new("/tmp/iterm.sock")
            .handshake_timeout(Duration::from_secs(1));
        assert_eq!(connector.socket_path(), Path::new("/tmp/iterm.sock"));

        if let Ok(path) = default_socket_path() {
            assert!(path.ends_with("Library/Application Support/iTerm2/private/socket"));
        }
    }

    #[tokio::test]
    async fn test_connect_missing_socket_is_handshake_error() {
        let connector = UnixWebSocketConnector::new("/nonexistent/iterm2-client-test.sock");
        let headers = HandshakeHeaders::new("rust");
        let result = connector.connect(&headers).await;
        assert!(matches!(result, Err(RpcError::Handshake(_))));
    }
}
