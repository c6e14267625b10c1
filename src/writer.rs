//! Dedicated writer task serializing all outbound messages.
//!
//! Callers never touch the transport's write half. They submit an encoded
//! message plus a private acknowledgment slot to an mpsc queue; a single task
//! drains the queue in submission order, performs exactly one write per
//! message and reports the outcome back through the slot.
//!
//! # Architecture
//!
//! ```text
//! Call 1 ─┐
//! Call 2 ─┼─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► MessageSink
//! Call N ─┘         ▲                               │
//!                   └──── oneshot ack per message ◄─┘
//! ```
//!
//! # Shutdown
//!
//! When the shutdown signal fires the queue is closed: messages already
//! queued are still written, new submissions fail immediately with
//! [`RpcError::ConnectionClosed`], and once the queue is empty the task closes
//! the sink and exits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::transport::MessageSink;

/// Default queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A message waiting to be written.
#[derive(Debug)]
pub struct OutboundMessage {
    /// Correlation ID of the call that produced this message (for logs).
    pub id: u64,
    /// Encoded envelope.
    pub bytes: Bytes,
    /// Where the write outcome goes.
    ack: oneshot::Sender<Result<()>>,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Capacity of the submission queue. Submitters wait for room when it is
    /// full.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for submitting messages to the writer task.
///
/// This is cheaply cloneable and can be shared across calls.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a message and wait until it has been written.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ConnectionClosed`] if the queue is closed, or the task
    ///   went away before writing the message
    /// - whatever error the sink reported for this write
    pub async fn write(&self, id: u64, bytes: Bytes) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();

        // Increment BEFORE sending, the task decrements after the write
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self
            .tx
            .send(OutboundMessage { id, bytes, ack })
            .await
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::Release);
            return Err(RpcError::ConnectionClosed);
        }

        ack_rx.await.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// Messages submitted but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped accepting messages.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for submitting messages.
///
/// # Arguments
///
/// * `sink` - Transport write half, owned by the task from now on
/// * `config` - Writer configuration
/// * `shutdown` - Flips to `true` (or is dropped) when the connection closes
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)`. The join handle resolves to the
/// result of closing the sink.
pub fn spawn_writer_task<S>(
    sink: S,
    config: WriterConfig,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: MessageSink,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, sink, pending, shutdown));

    (handle, task)
}

/// Main writer loop - one write per message, strictly in queue order.
async fn writer_loop<S>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut sink: S,
    pending: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: MessageSink,
{
    let mut closing = *shutdown.borrow_and_update();
    if closing {
        rx.close();
    }

    loop {
        let next = if closing {
            rx.recv().await
        } else {
            tokio::select! {
                biased;
                next = rx.recv() => next,
                _ = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    closing = true;
                    rx.close();
                    continue;
                }
            }
        };

        let Some(message) = next else {
            break;
        };

        let result = sink.send(message.bytes).await;
        pending.fetch_sub(1, Ordering::Release);

        if let Err(e) = &result {
            tracing::error!(id = message.id, error = %e, "write failed");
        }
        // The caller may have given up already
        let _ = message.ack.send(result);
    }

    tracing::debug!("writer queue drained, closing transport");
    sink.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::HandshakeHeaders;
    use crate::transport::{Connector, MemoryConnector, MemoryPeer, MemorySink};
    use std::time::Duration;

    async fn setup() -> (MemorySink, MemoryPeer) {
        let (connector, mut acceptor) = MemoryConnector::new();
        let (sink, _source) = connector
            .connect(&HandshakeHeaders::default())
            .await
            .unwrap();
        (sink, acceptor.accept().await.unwrap())
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_write_is_acknowledged() {
        let (sink, mut peer) = setup().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        handle.write(1, Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_write_error_reported_to_submitter() {
        let (sink, peer) = setup().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        peer.fail_writes(true);
        let result = handle.write(1, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(RpcError::Write(_))));

        peer.fail_writes(false);
        assert!(handle.write(2, Bytes::from_static(b"y")).await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_preserve_submission_order() {
        let (sink, mut peer) = setup().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        for i in 0..20u32 {
            handle
                .write(i as u64, Bytes::copy_from_slice(&i.to_be_bytes()))
                .await
                .unwrap();
        }

        for i in 0..20u32 {
            let msg = peer.recv().await.unwrap();
            assert_eq!(&msg[..], &i.to_be_bytes());
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_closes_sink() {
        let (sink, mut peer) = setup().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        handle.write(1, Bytes::from_static(b"before")).await.unwrap();
        shutdown_tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"before"));
        // Sink closed after the drain
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails_fast() {
        let (sink, _peer) = setup().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        shutdown_tx.send_replace(true);
        task.await.unwrap().unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            handle.write(9, Bytes::from_static(b"late")),
        )
        .await
        .expect("write after shutdown must not block");
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(handle.is_closed());
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_task() {
        let (sink, _peer) = setup().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_handle, task) = spawn_writer_task(sink, WriterConfig::default(), shutdown_rx);

        drop(shutdown_tx);

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
