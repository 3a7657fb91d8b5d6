//! Client configuration.
//!
//! Options are independent knobs with override semantics: applying the
//! same option twice keeps the later value, and [`Client::set_options`]
//! merges a new set over the live one without touching knobs the new set
//! leaves unset. TLS material is loaded eagerly, so a bad path fails here
//! and not at connect time.
//!
//! [`Client::set_options`]: crate::Client::set_options

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::codec::MessageCodec;
use crate::error::Result;
use crate::tls::TlsSettings;

/// Boxed future returned by the callback handlers.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Invoked by the idle scheduler when the link has gone quiet.
///
/// Runs on an internal task and receives a clone of the client, so the
/// usual body is a `client.send(...)` of a network-management message.
pub type PingHandler<C> = Arc<dyn Fn(Client<C>) -> BoxFuture + Send + Sync>;

/// Invoked for replies that no waiter claims - typically a response that
/// arrived after its request already timed out.
///
/// Runs on an internal task; it may call back into [`Client::send`].
///
/// [`Client::send`]: crate::Client::send
pub type UnmatchedMessageHandler<C> =
    Arc<dyn Fn(Client<C>, <C as MessageCodec>::Message) -> BoxFuture + Send + Sync>;

/// Configuration for a [`Client`].
///
/// [`Client`]: crate::Client
pub struct Options<C: MessageCodec> {
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) idle_time: Option<Duration>,
    pub(crate) ping_handler: Option<PingHandler<C>>,
    pub(crate) unmatched_handler: Option<UnmatchedMessageHandler<C>>,
    pub(crate) tls: Option<TlsSettings>,
}

impl<C: MessageCodec> Default for Options<C> {
    fn default() -> Self {
        Self {
            send_timeout: None,
            idle_time: None,
            ping_handler: None,
            unmatched_handler: None,
            tls: None,
        }
    }
}

impl<C: MessageCodec> std::fmt::Debug for Options<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("send_timeout", &self.send_timeout)
            .field("idle_time", &self.idle_time)
            .field("ping_handler", &self.ping_handler.is_some())
            .field("unmatched_handler", &self.unmatched_handler.is_some())
            .field("tls", &self.tls)
            .finish()
    }
}

impl<C: MessageCodec> Options<C> {
    /// Create an empty option set: wait forever for replies, no idle
    /// pings, no handlers, plain TCP.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum wait per request, from enqueue to reply. Without it a
    /// `send` waits until a reply arrives or the connection closes.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Inactivity threshold that triggers the ping handler.
    #[must_use]
    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = Some(idle_time);
        self
    }

    /// Install the keep-alive handler. It only fires when an idle time is
    /// also configured.
    #[must_use]
    pub fn with_ping_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Client<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ping_handler = Some(Arc::new(move |client| Box::pin(handler(client)) as BoxFuture));
        self
    }

    /// Install the handler for replies without a waiter.
    #[must_use]
    pub fn with_unmatched_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Client<C>, C::Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.unmatched_handler = Some(Arc::new(move |client, message| {
            Box::pin(handler(client, message)) as BoxFuture
        }));
        self
    }

    /// Load a client certificate and key for mutual TLS. Enables TLS on
    /// the connection.
    ///
    /// # Errors
    ///
    /// Fails when the PEM files are unreadable or contain no usable
    /// material.
    pub fn with_client_cert(
        mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self> {
        self.tls
            .get_or_insert_with(TlsSettings::default)
            .load_client_cert(cert_path, key_path)?;
        Ok(self)
    }

    /// Replace the system trust store with the CA bundle at `ca_path`.
    /// Enables TLS on the connection.
    ///
    /// # Errors
    ///
    /// Fails when the bundle is unreadable or contains no certificates.
    pub fn with_root_cas(mut self, ca_path: impl AsRef<Path>) -> Result<Self> {
        self.tls
            .get_or_insert_with(TlsSettings::default)
            .load_root_cas(ca_path)?;
        Ok(self)
    }

    /// The configured send timeout, if any.
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    /// The configured idle threshold, if any.
    pub fn idle_time(&self) -> Option<Duration> {
        self.idle_time
    }

    /// Whether a ping handler is installed.
    pub fn has_ping_handler(&self) -> bool {
        self.ping_handler.is_some()
    }

    /// Whether an unmatched-message handler is installed.
    pub fn has_unmatched_handler(&self) -> bool {
        self.unmatched_handler.is_some()
    }

    /// The accumulated TLS settings, if TLS is enabled.
    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    /// Overlay `other` onto `self`: every knob `other` sets wins, every
    /// knob it leaves unset keeps its current value.
    pub(crate) fn merge(&mut self, other: Options<C>) {
        if let Some(timeout) = other.send_timeout {
            self.send_timeout = Some(timeout);
        }
        if let Some(idle_time) = other.idle_time {
            self.idle_time = Some(idle_time);
        }
        if let Some(handler) = other.ping_handler {
            self.ping_handler = Some(handler);
        }
        if let Some(handler) = other.unmatched_handler {
            self.unmatched_handler = Some(handler);
        }
        // The client certificate and the root override are separate
        // knobs; overlay them individually so setting one never clears
        // the other.
        if let Some(tls) = other.tls {
            match &mut self.tls {
                Some(current) => current.merge(tls),
                None => self.tls = Some(tls),
            }
        }
    }
}
