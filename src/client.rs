//! Client builder and connection runtime.
//!
//! The [`ClientBuilder`] collects configuration and performs the handshake.
//! The resulting [`Connection`] manages the lifecycle:
//! 1. Handshake (pre-shared cookie, then one interactive fallback)
//! 2. Spawn the writer task (send path)
//! 3. Spawn the read loop (receive path)
//! 4. Multiplex any number of concurrent [`Connection::call`]s
//! 5. [`Connection::close`] fails in-flight calls and tears both tasks down
//!
//! # Example
//!
//! ```ignore
//! use iterm2_client::codec::{MsgPackCodec, Request, Response};
//! use iterm2_client::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::builder()
//!         .app_name("my-plugin")
//!         .call_timeout(std::time::Duration::from_secs(5))
//!         .connect(MsgPackCodec::<Request<String>, Response<String>>::new())
//!         .await?;
//!
//!     let reply = conn.call(Request::new("list-sessions".to_string())).await?;
//!     println!("{:?}", reply);
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::{remote_error, Codec, RequestEnvelope, ResponseEnvelope};
use crate::control::{establish, Authorizer, HandshakeConfig, OsascriptAuthorizer};
use crate::error::{Result, RpcError};
use crate::registry::{CallRegistry, PendingGuard};
use crate::transport::{Connector, MessageSink, MessageSource, UnixWebSocketConnector};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default time [`Connection::close`] waits for queued writes to flush.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Payload type a call on a connection using codec `C` returns.
pub type Payload<C> = <<C as Codec>::Response as ResponseEnvelope>::Payload;

/// Runtime settings for an established connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Deadline applied to every [`Connection::call`]. `None` waits until the
    /// response arrives or the connection closes.
    pub call_timeout: Option<Duration>,
    /// How long [`Connection::close`] lets the writer flush before dropping
    /// the transport.
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            call_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Builder for configuring and connecting a client.
///
/// Use the fluent API to set options, then call `connect()` (or
/// `connect_with()` for a custom transport or authorizer).
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    handshake: HandshakeConfig,
    config: ConnectionConfig,
}

impl ClientBuilder {
    /// Create a builder. The pre-shared cookie is read from `ITERM2_COOKIE`.
    pub fn new() -> Self {
        Self {
            handshake: HandshakeConfig::from_env(None),
            config: ConnectionConfig::default(),
        }
    }

    /// Application name registered with iTerm2.
    ///
    /// A stable name lets iTerm2 remember the user's permission instead of
    /// prompting on every run.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.handshake.app_name = Some(name.into());
        self
    }

    /// Use `cookie` as the pre-shared cookie instead of the environment's.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.handshake.cookie = Some(cookie.into());
        self
    }

    /// Skip the pre-shared cookie and always negotiate a fresh one.
    pub fn no_cookie(mut self) -> Self {
        self.handshake.cookie = None;
        self
    }

    /// Override the library identifier sent during the handshake.
    pub fn library_version(mut self, version: impl Into<String>) -> Self {
        self.handshake.library_version = version.into();
        self
    }

    /// Deadline for every call made through [`Connection::call`].
    ///
    /// Default: none
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Bound on how long `close()` waits for queued writes.
    ///
    /// Default: 5 seconds
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Set the writer queue capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Connect to the local iTerm2 socket, negotiating credentials through
    /// AppleScript if needed.
    pub async fn connect<C: Codec>(self, codec: C) -> Result<Connection<C>> {
        let connector = UnixWebSocketConnector::from_home()?;
        self.connect_with(&connector, &OsascriptAuthorizer, codec)
            .await
    }

    /// Connect through a custom connector and authorizer.
    ///
    /// This will:
    /// 1. Try the pre-shared cookie, if any
    /// 2. On failure, ask `authorizer` for a fresh cookie/key once
    /// 3. Start the writer task and read loop
    pub async fn connect_with<Cn, A, C>(
        self,
        connector: &Cn,
        authorizer: &A,
        codec: C,
    ) -> Result<Connection<C>>
    where
        Cn: Connector + ?Sized,
        A: Authorizer + ?Sized,
        C: Codec,
    {
        let (sink, source) = establish(connector, authorizer, &self.handshake).await?;
        Ok(Connection::start(sink, source, codec, self.config))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A live, multiplexed connection.
///
/// Cloning is cheap; all clones share the same transport, writer task and
/// call registry.
pub struct Connection<C: Codec> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Codec> {
    codec: Arc<C>,
    registry: Arc<CallRegistry<C::Response>>,
    writer: WriterHandle,
    shutdown: watch::Sender<bool>,
    call_timeout: Option<Duration>,
    drain_timeout: Duration,
    /// Writer and read loop handles, taken by the first `close()`.
    tasks: Mutex<Option<(JoinHandle<Result<()>>, JoinHandle<()>)>>,
}

impl<C: Codec> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Codec> Connection<C> {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a connection on an already established transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<S, R>(sink: S, source: R, codec: C, config: ConnectionConfig) -> Self
    where
        S: MessageSink,
        R: MessageSource,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let codec = Arc::new(codec);
        let registry = Arc::new(CallRegistry::new());

        let (writer, writer_task) = spawn_writer_task(sink, config.writer, shutdown_rx.clone());
        let reader_task = tokio::spawn(Self::read_loop(
            source,
            codec.clone(),
            registry.clone(),
            shutdown_rx,
        ));

        tracing::debug!("connection started");

        Connection {
            inner: Arc::new(Inner {
                codec,
                registry,
                writer,
                shutdown: shutdown_tx,
                call_timeout: config.call_timeout,
                drain_timeout: config.drain_timeout,
                tasks: Mutex::new(Some((writer_task, reader_task))),
            }),
        }
    }

    /// Main read loop - decodes inbound messages and resolves pending calls.
    ///
    /// Malformed frames, unroutable responses and read errors are logged and
    /// skipped. The loop ends on shutdown or when the server hangs up; either
    /// way the registry is closed so nobody keeps waiting.
    async fn read_loop<R: MessageSource>(
        mut source: R,
        codec: Arc<C>,
        registry: Arc<CallRegistry<C::Response>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = source.recv() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    tracing::warn!(error = %e, "read error");
                    continue;
                }
                None => {
                    tracing::debug!("server closed the connection");
                    break;
                }
            };

            let response = match codec.decode(&bytes) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, len = bytes.len(), "dropping malformed frame");
                    continue;
                }
            };

            let id = response.id();
            if let Err(e) = registry.resolve(id, response) {
                tracing::warn!(id, error = %e, "dropping unroutable response");
            }
        }

        let failed = registry.close();
        if failed > 0 {
            tracing::debug!(failed, "failing calls left on closed connection");
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Applies the builder's call timeout, if one was set.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Encode`] if the request cannot be serialized
    /// - [`RpcError::Write`] if the transport write failed
    /// - [`RpcError::Remote`] if the server answered with an error string
    /// - [`RpcError::ConnectionClosed`] if the connection closed first
    /// - [`RpcError::Timeout`] if the call timeout expired
    pub async fn call(&self, request: C::Request) -> Result<Payload<C>> {
        match self.inner.call_timeout {
            Some(timeout) => self.call_with_timeout(request, timeout).await,
            None => self.dispatch(request).await,
        }
    }

    /// Like [`call`](Self::call) with an explicit deadline.
    ///
    /// On expiry the pending entry is cancelled, so a late response is
    /// dropped as unroutable.
    pub async fn call_with_timeout(
        &self,
        request: C::Request,
        timeout: Duration,
    ) -> Result<Payload<C>> {
        tokio::time::timeout(timeout, self.dispatch(request))
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    async fn dispatch(&self, mut request: C::Request) -> Result<Payload<C>> {
        let inner = &self.inner;

        let pending = inner.registry.register_next()?;
        let id = pending.id();
        // Cancels the entry on every early return, and if this future is dropped
        let mut guard = PendingGuard::new(inner.registry.clone(), id);

        request.set_id(id);
        let bytes = inner.codec.encode(&request)?;
        inner.writer.write(id, bytes).await?;

        let response = pending.wait().await?;
        guard.disarm();

        if let Some(error) = remote_error(&response) {
            return Err(RpcError::Remote(error.to_string()));
        }
        Ok(response.into_payload())
    }

    /// Close the connection.
    ///
    /// Stops accepting writes, stops the read loop, fails every in-flight call
    /// with [`RpcError::ConnectionClosed`] and closes the transport. Calling it
    /// again returns `Ok(())`.
    ///
    /// Queued writes get up to the drain timeout to flush. If the transport
    /// stalls past that, the writer is aborted and the transport dropped; any
    /// call still waiting on its write fails with `ConnectionClosed` and this
    /// returns [`RpcError::Timeout`].
    pub async fn close(&self) -> Result<()> {
        let tasks = self.inner.tasks.lock().take();
        let Some((mut writer_task, reader_task)) = tasks else {
            return Ok(());
        };

        tracing::debug!(pending = self.inner.registry.len(), "closing connection");
        self.inner.shutdown.send_replace(true);
        self.inner.registry.close();

        let drain_timeout = self.inner.drain_timeout;
        let closed = match tokio::time::timeout(drain_timeout, &mut writer_task).await {
            Ok(joined) => {
                joined.map_err(|e| RpcError::Transport(format!("writer task failed: {}", e)))?
            }
            Err(_) => {
                tracing::warn!(?drain_timeout, "writer did not drain in time, dropping transport");
                writer_task.abort();
                // Cancelled; the sink and every pending ack are dropped with it
                let _ = writer_task.await;
                Err(RpcError::Timeout(drain_timeout))
            }
        };

        if let Err(e) = reader_task.await {
            tracing::error!(error = %e, "read loop failed");
        }
        closed
    }

    /// Whether the connection was closed locally or by the server.
    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow() || self.inner.registry.is_closed()
    }

    /// Correlation IDs of calls still waiting for a response.
    pub fn pending_calls(&self) -> Vec<u64> {
        self.inner.registry.pending_ids()
    }

    /// Messages queued for writing but not yet written.
    pub fn queued_writes(&self) -> usize {
        self.inner.writer.pending_count()
    }
}
