//! Client lifecycle and request multiplexing.
//!
//! One [`Client`] owns one connection. After `connect` it runs three
//! background tasks:
//!
//! 1. the writer loop, sole owner of the write half, draining the
//!    outbound queue in enqueue order;
//! 2. the reader loop, sole owner of the read half, correlating each
//!    decoded reply to its waiter by STAN;
//! 3. the idle scheduler, firing the ping handler when the link goes
//!    quiet.
//!
//! `send` stamps a fresh STAN into field 11, registers a delivery slot
//! under it, enqueues the encoded frame, and parks until the reader
//! resolves the slot, the connection dies, or the send timeout fires.
//! `close` drains: it refuses new sends, waits for every in-flight send to
//! reach a terminal state, then tears the tasks down in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{IsoMessage, MessageCodec, STAN_FIELD};
use crate::error::{ClientError, Result};
use crate::framing::LengthHeader;
use crate::idle::{self, ActivityTracker};
use crate::options::{Options, UnmatchedMessageHandler};
use crate::pending::{Delivery, PendingRegistry};
use crate::stan::StanSequence;
use crate::transport::Transport;
use crate::writer::{self, WriterHandle};

/// A client bound to one ISO 8583 connection.
///
/// Cheap to clone; all clones share the connection. Handlers receive a
/// clone and may call [`Client::send`] from inside their own task.
pub struct Client<C: MessageCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: MessageCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: MessageCodec> {
    addr: String,
    codec: C,
    header: Arc<dyn LengthHeader>,
    options: RwLock<Options<C>>,
    stan: StanSequence,
    pending: PendingRegistry<C::Message>,
    activity: Arc<ActivityTracker>,
    /// Set by `close` or by connection teardown; new sends fail fast.
    closed: AtomicBool,
    /// Guards against a second `connect`.
    connecting: AtomicBool,
    /// Cancelled exactly once, on teardown; reader and idle loops watch it.
    shutdown: CancellationToken,
    /// Present while connected. Taking it closes the outbound queue.
    writer: Mutex<Option<WriterHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: MessageCodec> Client<C> {
    /// Create an unconnected client. Performs no I/O.
    pub fn new(
        addr: impl Into<String>,
        codec: C,
        header: impl LengthHeader,
        options: Options<C>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                codec,
                header: Arc::new(header),
                options: RwLock::new(options),
                stan: StanSequence::new(),
                pending: PendingRegistry::new(),
                activity: Arc::new(ActivityTracker::new()),
                closed: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                writer: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The address this client dials.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Whether the client has been closed or lost its connection.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Read access to the live options.
    pub fn options(&self) -> impl std::ops::Deref<Target = Options<C>> + '_ {
        self.inner.options.read()
    }

    /// Merge `options` over the live set. Later values win; unset knobs
    /// keep their current value.
    ///
    /// Safe at any time. The send timeout applies to subsequent sends
    /// immediately; idle time and handlers are captured by [`connect`],
    /// so changing them on a connected client has no effect until then.
    ///
    /// [`connect`]: Client::connect
    pub fn set_options(&self, options: Options<C>) {
        self.inner.options.write().merge(options);
    }

    /// Open the connection and start the background tasks.
    ///
    /// At most one `connect` per client. A failed dial may be retried; a
    /// closed client cannot be reconnected.
    pub async fn connect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        if self.inner.connecting.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Config(
                "client is already connected".to_string(),
            ));
        }

        match self.connect_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.connecting.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn connect_inner(&self) -> Result<()> {
        // Build the TLS config before the first await; the options lock
        // must not be held across one.
        let tls_config = match self.inner.options.read().tls() {
            Some(settings) => Some(settings.client_config()?),
            None => None,
        };

        let transport = Transport::connect(&self.inner.addr, tls_config).await?;
        let (read_half, write_half) = tokio::io::split(transport);

        let shutdown = self.inner.shutdown.clone();
        let (writer_handle, writer_task) =
            writer::spawn_writer_task(write_half, self.inner.header.clone(), shutdown.clone());
        // The handle must be in place before the reader runs: reader
        // teardown takes it to close the outbound queue.
        *self.inner.writer.lock() = Some(writer_handle);
        self.inner.activity.touch();

        let mut tasks = vec![writer_task];

        // Handlers and the idle threshold are captured here; later
        // `set_options` calls do not reach a live connection.
        let (idle_time, ping_handler, unmatched_handler) = {
            let options = self.inner.options.read();
            (
                options.idle_time(),
                options.ping_handler.clone(),
                options.unmatched_handler.clone(),
            )
        };

        let reader = self.clone();
        tasks.push(tokio::spawn(async move {
            reader.read_loop(read_half, unmatched_handler).await;
        }));

        if let (Some(idle_time), Some(handler)) = (idle_time, ping_handler) {
            let client = self.clone();
            let in_flight = Arc::new(AtomicBool::new(false));
            let fire = move || {
                // Skip the tick while a previous ping is still running.
                if in_flight.swap(true, Ordering::AcqRel) {
                    return;
                }
                let done = in_flight.clone();
                let ping = handler(client.clone());
                tokio::spawn(async move {
                    ping.await;
                    done.store(false, Ordering::Release);
                });
            };
            tasks.push(tokio::spawn(idle::idle_loop(
                self.inner.activity.clone(),
                idle_time,
                shutdown.clone(),
                fire,
            )));
        }

        self.inner.tasks.lock().extend(tasks);
        tracing::debug!(addr = %self.inner.addr, "connected");
        Ok(())
    }

    /// Send a request and wait for its correlated reply.
    ///
    /// A fresh STAN is stamped into field 11, overwriting any value the
    /// caller put there. Safe to call from any number of tasks; replies
    /// come back in whatever order the server produces them.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionClosed`] once the client is closed or the
    /// connection has failed; [`ClientError::SendTimeout`] when the
    /// configured timeout elapses first (the late reply, if any, goes to
    /// the unmatched-message handler); [`ClientError::Codec`] when the
    /// message cannot be stamped or encoded.
    pub async fn send(&self, mut message: C::Message) -> Result<C::Message> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        // Vacant-insert keeps in-flight STANs unique even across counter
        // wraparound: a value with a live waiter is skipped.
        let (stan, slot) = loop {
            let stan = self.inner.stan.next();
            if let Some(slot) = self.inner.pending.try_register(stan.clone()) {
                break (stan, slot);
            }
        };

        if let Err(err) = message.set_string(STAN_FIELD, &stan) {
            self.inner.pending.remove(&stan);
            return Err(ClientError::Codec(err));
        }
        let frame = match self.inner.codec.encode(&message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                self.inner.pending.remove(&stan);
                return Err(ClientError::Codec(err));
            }
        };

        let writer = self.inner.writer.lock().clone();
        let enqueued = match writer {
            Some(writer) => writer.send(frame).await,
            None => Err(ClientError::ConnectionClosed),
        };
        if enqueued.is_err() {
            self.inner.pending.remove(&stan);
            return Err(ClientError::ConnectionClosed);
        }
        self.inner.activity.touch();

        let send_timeout = self.inner.options.read().send_timeout();
        let delivery = match send_timeout {
            Some(limit) => match tokio::time::timeout(limit, slot).await {
                Ok(delivery) => delivery,
                Err(_) => {
                    self.inner.pending.remove(&stan);
                    return Err(ClientError::SendTimeout);
                }
            },
            None => slot.await,
        };

        match delivery {
            Ok(Delivery::Reply(reply)) => Ok(reply),
            Ok(Delivery::Closed) | Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Close the client.
    ///
    /// Idempotent, and legal before [`connect`]. New sends fail
    /// immediately with [`ClientError::ConnectionClosed`]; sends already
    /// in flight are not cancelled - `close` waits until each has seen its
    /// reply, its timeout, or the closed error, then stops the background
    /// tasks and returns.
    ///
    /// [`connect`]: Client::connect
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);

        // Drain: the reader keeps delivering while we wait, so requests
        // that already crossed the wire get their replies.
        self.inner.pending.wait_empty().await;

        // Closing the queue lets the writer flush and exit; cancellation
        // stops the reader and the idle scheduler.
        self.inner.writer.lock().take();
        self.inner.shutdown.cancel();

        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if task.await.is_err() {
                tracing::warn!("background task terminated abnormally");
            }
        }
        Ok(())
    }

    async fn read_loop(
        self,
        mut reader: ReadHalf<Transport>,
        unmatched_handler: Option<UnmatchedMessageHandler<C>>,
    ) {
        let shutdown = self.inner.shutdown.clone();

        loop {
            let len = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.inner.header.read_length(&mut reader) => match read {
                    Ok(len) => len,
                    Err(err) => {
                        if err.kind() != std::io::ErrorKind::UnexpectedEof {
                            tracing::error!(error = %err, "read failed, closing connection");
                        }
                        break;
                    }
                },
            };

            let mut body = vec![0u8; len];
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = reader.read_exact(&mut body) => read,
            };
            if let Err(err) = read {
                tracing::error!(error = %err, "read failed, closing connection");
                break;
            }

            let message = match self.inner.codec.decode(&body) {
                Ok(message) => message,
                Err(err) => {
                    tracing::error!(error = %err, "failed to decode inbound frame, closing connection");
                    break;
                }
            };
            self.inner.activity.touch();
            self.dispatch(message, &unmatched_handler);
        }

        self.teardown();
    }

    /// Route one decoded inbound message to its waiter, or to the
    /// unmatched-message handler captured at connect.
    fn dispatch(&self, message: C::Message, unmatched_handler: &Option<UnmatchedMessageHandler<C>>) {
        let Some(stan) = message.get_string(STAN_FIELD) else {
            tracing::warn!(mti = ?message.mti(), "dropping message without a trace number");
            return;
        };

        if let Some(unclaimed) = self.inner.pending.complete(&stan, message) {
            // The registry lock is already released here, so a handler
            // that calls send() cannot deadlock.
            match unmatched_handler {
                Some(handler) => {
                    tokio::spawn(handler(self.clone(), unclaimed));
                }
                None => {
                    tracing::debug!(stan = %stan, "discarding unmatched reply");
                }
            }
        }
    }

    /// Single teardown path: reader exit (EOF, transport or decode error,
    /// or cancellation) funnels here, as does a writer failure via the
    /// shutdown token.
    fn teardown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        // Close the outbound queue so the writer loop exits.
        self.inner.writer.lock().take();
        // Every remaining waiter learns the connection is gone.
        self.inner.pending.drain();
        self.inner.shutdown.cancel();
    }
}
