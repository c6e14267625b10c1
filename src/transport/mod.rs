//! Transport module - full-duplex message channels to the server.
//!
//! A transport is opened by a [`Connector`] with the handshake headers and
//! comes back split into a write half ([`MessageSink`]) and a read half
//! ([`MessageSource`]). The writer task owns the sink and the read loop owns
//! the source, so neither half needs a lock.
//!
//! Implementations:
//! - [`websocket`] - WebSocket over the iTerm2 Unix domain socket
//! - [`mem`] - in-process channel pair, used as a scriptable fake server

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::control::HandshakeHeaders;
use crate::error::Result;

pub mod mem;
pub mod websocket;

pub use mem::{MemoryConnector, MemoryPeer, MemorySink, MemorySource, PeerAcceptor, PeerSender};
pub use websocket::{default_socket_path, UnixWebSocketConnector, WebSocketSink, WebSocketSource};

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a message transport.
pub trait MessageSink: Send + 'static {
    /// Write exactly one message.
    fn send(&mut self, message: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Close the write direction and the underlying connection.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a message transport.
pub trait MessageSource: Send + 'static {
    /// Receive the next message.
    ///
    /// `None` means the peer closed the connection. `Some(Err(_))` is a read
    /// error that may or may not be transient.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>>;
}

/// Opens a transport using the given handshake headers.
pub trait Connector: Send + Sync {
    /// Write half produced by this connector.
    type Sink: MessageSink;
    /// Read half produced by this connector.
    type Source: MessageSource;

    /// Perform the handshake and return the split transport.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Handshake`](crate::RpcError::Handshake) when the
    /// server refuses the connection or the headers.
    fn connect<'a>(
        &'a self,
        headers: &'a HandshakeHeaders,
    ) -> BoxFuture<'a, Result<(Self::Sink, Self::Source)>>;
}
