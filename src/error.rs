//! Error types for iso8583-client.

use thiserror::Error;

/// Boxed error used at the codec seam.
///
/// The ISO 8583 codec is supplied by the caller; whatever error type it
/// produces is carried through as a trait object.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection has been closed, either by [`Client::close`] or
    /// because the underlying stream failed. Not recoverable on this
    /// client instance.
    ///
    /// [`Client::close`]: crate::Client::close
    #[error("connection closed")]
    ConnectionClosed,

    /// No reply arrived within the configured send timeout. Only the
    /// affected request observes this; a late reply is routed to the
    /// unmatched-message handler.
    #[error("send timeout")]
    SendTimeout,

    /// I/O error while dialing the server.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake error.
    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// Invalid configuration (unusable TLS material, bad server name,
    /// connecting twice, and the like).
    #[error("configuration error: {0}")]
    Config(String),

    /// The codec failed to encode a message or to stamp the trace number
    /// onto it.
    #[error("codec error: {0}")]
    Codec(#[source] BoxError),
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
