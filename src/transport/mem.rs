//! In-process transport for tests and embedding.
//!
//! [`MemoryConnector`] hands out a fresh channel pair on every successful
//! handshake. The server side of each pair is a [`MemoryPeer`] delivered
//! through a [`PeerAcceptor`], so a test can play the remote end: read what
//! the client wrote (in write order), inject responses, inject read errors,
//! make writes fail, or hang up.
//!
//! # Example
//!
//! ```ignore
//! let (connector, mut acceptor) = MemoryConnector::new();
//! let conn = Connection::builder().connect_with(&connector, &authorizer, codec).await?;
//! let mut peer = acceptor.accept().await.unwrap();
//! let written = peer.recv().await.unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BoxFuture, Connector, MessageSink, MessageSource};
use crate::control::HandshakeHeaders;
use crate::error::{Result, RpcError};

type HandshakePolicy = dyn Fn(&HandshakeHeaders) -> std::result::Result<(), String> + Send + Sync;

/// Connector producing in-memory channel pairs.
pub struct MemoryConnector {
    policy: Box<HandshakePolicy>,
    attempts: Arc<Mutex<Vec<HandshakeHeaders>>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the server side of each connection made through a
/// [`MemoryConnector`].
pub struct PeerAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl PeerAcceptor {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take an already accepted connection, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

impl MemoryConnector {
    /// Connector that accepts every handshake.
    pub fn new() -> (Self, PeerAcceptor) {
        Self::with_policy(|_| Ok(()))
    }

    /// Connector that runs `policy` on each handshake; an `Err` rejects it
    /// with that message.
    pub fn with_policy<F>(policy: F) -> (Self, PeerAcceptor)
    where
        F: Fn(&HandshakeHeaders) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            policy: Box::new(policy),
            attempts: Arc::new(Mutex::new(Vec::new())),
            peers: tx,
        };
        (connector, PeerAcceptor { peers: rx })
    }

    /// Shared log of every handshake attempted, accepted or not.
    pub fn attempts(&self) -> Arc<Mutex<Vec<HandshakeHeaders>>> {
        self.attempts.clone()
    }
}

impl Connector for MemoryConnector {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn connect<'a>(
        &'a self,
        headers: &'a HandshakeHeaders,
    ) -> BoxFuture<'a, Result<(MemorySink, MemorySource)>> {
        Box::pin(async move {
            self.attempts.lock().push(headers.clone());

            (self.policy)(headers).map_err(RpcError::Handshake)?;

            let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
            let fail_writes = Arc::new(AtomicBool::new(false));

            let peer = MemoryPeer {
                inbound: to_peer_rx,
                outbound: PeerSender { tx: to_client_tx },
                fail_writes: fail_writes.clone(),
            };
            self.peers
                .send(peer)
                .map_err(|_| RpcError::Handshake("memory acceptor dropped".into()))?;

            Ok((
                MemorySink {
                    tx: Some(to_peer_tx),
                    fail_writes,
                },
                MemorySource { rx: to_client_rx },
            ))
        })
    }
}

/// Client write half of an in-memory transport.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    fail_writes: Arc<AtomicBool>,
}

impl MessageSink for MemorySink {
    fn send(&mut self, message: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.fail_writes.load(Ordering::Acquire) {
                return Err(RpcError::Write("injected write failure".into()));
            }
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| RpcError::Write("sink closed".into()))?;
            tx.send(message)
                .map_err(|_| RpcError::Write("peer hung up".into()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx = None;
            Ok(())
        })
    }
}

/// Client read half of an in-memory transport.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Bytes>>,
}

impl MessageSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>> {
        Box::pin(self.rx.recv())
    }
}

/// Cloneable handle for pushing messages to the client.
#[derive(Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl PeerSender {
    /// Deliver a message to the client's read loop. Returns `false` if the
    /// client side is gone.
    pub fn send(&self, message: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(message.into())).is_ok()
    }

    /// Make the client's next read fail with `error`.
    pub fn send_error(&self, error: RpcError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

/// Server side of an in-memory connection.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: PeerSender,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Next message written by the client. `None` once the client closed
    /// its sink.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Deliver a message to the client.
    pub fn send(&self, message: impl Into<Bytes>) -> bool {
        self.outbound.send(message)
    }

    /// Make the client's next read fail with `error`.
    pub fn send_error(&self, error: RpcError) -> bool {
        self.outbound.send_error(error)
    }

    /// Handle for sending from another task.
    pub fn sender(&self) -> PeerSender {
        self.outbound.clone()
    }

    /// Make every subsequent client write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Hang up: the client's read loop sees end of stream once every
    /// [`PeerSender`] clone is dropped too.
    pub fn hang_up(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let headers = HandshakeHeaders::new("rust");
        let (mut sink, mut source) = connector.connect(&headers).await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        sink.send(Bytes::from_static(b"up")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"up"));

        assert!(peer.send(Bytes::from_static(b"down")));
        assert_eq!(source.recv().await.unwrap().unwrap(), Bytes::from_static(b"down"));
    }

    #[tokio::test]
    async fn test_policy_rejects_and_records() {
        let (connector, mut acceptor) =
            MemoryConnector::with_policy(|h| match h.cookie_value() {
                Some("good") => Ok(()),
                _ => Err("bad cookie".into()),
            });
        let attempts = connector.attempts();

        let bad = HandshakeHeaders::new("rust").cookie("stale");
        let result = connector.connect(&bad).await;
        assert!(matches!(result, Err(RpcError::Handshake(ref m)) if m == "bad cookie"));
        assert!(acceptor.try_accept().is_none());

        let good = HandshakeHeaders::new("rust").cookie("good");
        assert!(connector.connect(&good).await.is_ok());
        assert!(acceptor.try_accept().is_some());

        assert_eq!(attempts.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_write_failure_and_hang_up() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let headers = HandshakeHeaders::new("rust");
        let (mut sink, mut source) = connector.connect(&headers).await.unwrap();
        let peer = acceptor.accept().await.unwrap();

        peer.fail_writes(true);
        assert!(matches!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(RpcError::Write(_))
        ));

        peer.hang_up();
        assert!(source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_close_ends_peer_stream() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let headers = HandshakeHeaders::new("rust");
        let (mut sink, _source) = connector.connect(&headers).await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        sink.close().await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(sink.send(Bytes::from_static(b"late")).await.is_err());
    }
}
