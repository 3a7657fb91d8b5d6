//! # iso8583-client
//!
//! Concurrent client for the ISO 8583 financial-transaction protocol over
//! a persistent, length-prefixed stream connection (TCP, optionally TLS).
//!
//! One [`Client`] multiplexes any number of concurrent request/response
//! exchanges over a single connection, correlating replies to requests by
//! the System Trace Audit Number (field 11).
//!
//! ## Architecture
//!
//! - **Writer loop**: sole owner of the write half; drains a bounded
//!   outbound queue in enqueue order.
//! - **Reader loop**: sole owner of the read half; decodes each inbound
//!   frame and resolves the matching waiter, or hands the message to the
//!   unmatched-message handler.
//! - **Idle scheduler**: fires the caller's ping handler when the link
//!   has been quiet past the configured threshold.
//!
//! The ISO 8583 codec itself is not part of this crate: plug one in via
//! the [`MessageCodec`] and [`IsoMessage`] traits. The length-prefix
//! framing is equally pluggable via [`LengthHeader`]; two stock formats
//! are included.
//!
//! ## Example
//!
//! ```ignore
//! use iso8583_client::{BinaryU16Header, Client, Options};
//!
//! #[tokio::main]
//! async fn main() -> iso8583_client::Result<()> {
//!     let client = Client::new(
//!         "switch.example.com:8583",
//!         MySpecCodec::new(),
//!         BinaryU16Header,
//!         Options::new().with_send_timeout(std::time::Duration::from_secs(30)),
//!     );
//!     client.connect().await?;
//!
//!     let mut request = MySpecCodec::message();
//!     request.set_mti("0800");
//!     let response = client.send(request).await?;
//!
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod framing;
pub mod options;
pub mod tls;

mod client;
mod idle;
mod pending;
mod stan;
mod transport;
mod writer;

pub use client::Client;
pub use codec::{IsoMessage, MessageCodec, STAN_FIELD};
pub use error::{BoxError, ClientError, Result};
pub use framing::{AsciiDecimalHeader, BinaryU16Header, LengthHeader};
pub use options::{BoxFuture, Options, PingHandler, UnmatchedMessageHandler};
pub use tls::TlsSettings;
