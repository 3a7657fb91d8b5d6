//! Dedicated writer task for outbound frames.
//!
//! Every `send` enqueues its encoded frame on a bounded mpsc channel; a
//! single task owns the write half of the stream and drains the channel,
//! so frames leave the wire in enqueue order and the socket never sees two
//! writers.
//!
//! ```text
//! send()  ─┐
//! send()  ─┼─► mpsc::Sender<Bytes> ─► writer loop ─► length prefix + body
//! ping    ─┘
//! ```

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::framing::LengthHeader;

/// Capacity of the outbound queue. A full queue blocks senders, which is
/// the backpressure ISO 8583 message rates never reach in practice.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Handle for enqueueing frames onto the writer loop.
///
/// Cheaply cloneable; dropping every clone closes the queue and lets the
/// loop exit after flushing what it already holds.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Enqueue one encoded frame body.
    ///
    /// Waits for queue space when the writer is behind. A closed queue
    /// means the connection is gone.
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

/// Spawn the writer loop over `writer`, returning the enqueue handle and
/// the task's join handle.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    header: Arc<dyn LengthHeader>,
    shutdown: CancellationToken,
) -> (WriterHandle, tokio::task::JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer, header, shutdown));
    (WriterHandle { tx }, task)
}

/// Main writer loop.
///
/// For each frame: length prefix via the caller-supplied header, then the
/// body. Frames already sitting in the queue are written before the single
/// flush, so a burst of sends costs one flush instead of one per frame.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    header: Arc<dyn LengthHeader>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            None => {
                // Queue closed: orderly shutdown.
                let _ = writer.shutdown().await;
                return;
            }
        };

        if let Err(err) = write_frame(&mut writer, header.as_ref(), &first).await {
            tracing::error!(error = %err, "write failed, closing connection");
            shutdown.cancel();
            return;
        }

        // Drain whatever else is already queued before flushing once.
        while let Ok(frame) = rx.try_recv() {
            if let Err(err) = write_frame(&mut writer, header.as_ref(), &frame).await {
                tracing::error!(error = %err, "write failed, closing connection");
                shutdown.cancel();
                return;
            }
        }

        if let Err(err) = writer.flush().await {
            tracing::error!(error = %err, "flush failed, closing connection");
            shutdown.cancel();
            return;
        }
    }
}

async fn write_frame<W>(
    writer: &mut W,
    header: &dyn LengthHeader,
    frame: &Bytes,
) -> std::io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    header.write_length(&mut *writer, frame.len()).await?;
    writer.write_all(frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::BinaryU16Header;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn spawn(
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> (WriterHandle, tokio::task::JoinHandle<()>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (handle, task) = spawn_writer_task(writer, Arc::new(BinaryU16Header), shutdown.clone());
        (handle, task, shutdown)
    }

    #[tokio::test]
    async fn frames_carry_length_prefix() {
        let (client, mut server) = duplex(4096);
        let (handle, _task, _shutdown) = spawn(client);

        handle.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = [0u8; 7];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x05]);
        assert_eq!(&buf[2..], b"hello");
    }

    #[tokio::test]
    async fn frames_keep_enqueue_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task, _shutdown) = spawn(client);

        for i in 0..10u8 {
            handle.send(Bytes::copy_from_slice(&[i])).await.unwrap();
        }

        for i in 0..10u8 {
            let mut buf = [0u8; 3];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0x00, 0x01, i]);
        }
    }

    #[tokio::test]
    async fn loop_exits_when_queue_closes() {
        let (client, _server) = duplex(4096);
        let (handle, task, shutdown) = spawn(client);

        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("writer loop should exit on queue close")
            .unwrap();
        assert!(!shutdown.is_cancelled(), "clean exit must not cancel");
    }

    #[tokio::test]
    async fn write_error_cancels_shutdown_token() {
        let (client, server) = duplex(16);
        let (handle, task, shutdown) = spawn(client);

        // Peer gone: writes fail once the duplex buffer is spoken for.
        drop(server);

        let frame = Bytes::from(vec![0u8; 8]);
        loop {
            if handle.send(frame.clone()).await.is_err() {
                break;
            }
            if shutdown.is_cancelled() {
                break;
            }
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("writer loop should exit on write error")
            .unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn send_after_loop_exit_reports_closed() {
        let (client, server) = duplex(16);
        let (handle, task, _shutdown) = spawn(client);

        drop(server);
        task.abort();
        let _ = task.await;

        let err = handle.send(Bytes::from_static(b"ok")).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }
}
