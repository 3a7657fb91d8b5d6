//! Codec seam - the ISO 8583 message specification stays outside the crate.
//!
//! The client never inspects message bodies beyond two things: stamping a
//! System Trace Audit Number into field 11 of an outgoing request, and
//! reading field 11 back out of a reply to find the matching waiter. The
//! message type indicator is read only for log lines. Everything else
//! (bitmaps, field encodings, padding) belongs to the codec the caller
//! plugs in here.

use crate::error::BoxError;

/// Field 11, the System Trace Audit Number. Owned by the client: any value
/// the caller placed there is overwritten by [`Client::send`].
///
/// [`Client::send`]: crate::Client::send
pub const STAN_FIELD: usize = 11;

/// An ISO 8583 message as seen by the client.
///
/// Implemented by whatever message type the caller's codec produces.
pub trait IsoMessage: Send + 'static {
    /// Set a field to a string value by field number.
    fn set_string(&mut self, field: usize, value: &str) -> Result<(), BoxError>;

    /// Read a field as a string by field number. `None` when the field is
    /// absent from the message.
    fn get_string(&self, field: usize) -> Option<String>;

    /// The four-digit message type indicator, when present. Used for
    /// diagnostics only.
    fn mti(&self) -> Option<String>;
}

/// Encodes and decodes ISO 8583 messages for one specification.
///
/// A codec instance is bound to a single message spec and shared by every
/// send and by the reader loop, so implementations must be `Sync`.
pub trait MessageCodec: Send + Sync + 'static {
    /// The message type this codec produces and consumes.
    type Message: IsoMessage;

    /// Encode a message into a frame body (without the length prefix).
    fn encode(&self, message: &Self::Message) -> Result<Vec<u8>, BoxError>;

    /// Decode a frame body into a message.
    fn decode(&self, frame: &[u8]) -> Result<Self::Message, BoxError>;
}
