//! Length-prefix framing.
//!
//! Every message on the wire is a length prefix followed by a body of
//! exactly that many bytes. Payment hosts disagree about what the prefix
//! looks like (two-byte binary, four-byte ASCII decimal, BCD, ...), so the
//! client does not hard-code one: it calls a caller-supplied
//! [`LengthHeader`] with the active reader or writer. Two stock
//! implementations cover the common cases.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads and writes the length prefix of a frame.
///
/// `read_length` is invoked by the reader loop with the stream positioned
/// at the start of a frame; `write_length` is invoked by the writer loop
/// immediately before the frame body. Implementations must consume or
/// produce exactly the prefix bytes and nothing else.
#[async_trait]
pub trait LengthHeader: Send + Sync + 'static {
    /// Read the next frame's body length from the stream.
    async fn read_length(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<usize>;

    /// Write the length prefix for a body of `len` bytes.
    async fn write_length(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        len: usize,
    ) -> io::Result<()>;
}

/// Two-byte big-endian unsigned length prefix.
///
/// The most common framing for ISO 8583 links; bodies are capped at 65535
/// bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryU16Header;

#[async_trait]
impl LengthHeader for BinaryU16Header {
    async fn read_length(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<usize> {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await?;
        Ok(u16::from_be_bytes(buf) as usize)
    }

    async fn write_length(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        len: usize,
    ) -> io::Result<()> {
        let len = u16::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame body of {len} bytes exceeds u16 length prefix"),
            )
        })?;
        writer.write_all(&len.to_be_bytes()).await
    }
}

/// Fixed-width ASCII decimal length prefix, zero-padded.
///
/// `AsciiDecimalHeader::new(4)` frames a 123-byte body as `0123`.
#[derive(Debug, Clone, Copy)]
pub struct AsciiDecimalHeader {
    width: usize,
}

impl AsciiDecimalHeader {
    /// Create a header with the given prefix width in digits.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or greater than 19 (a wider prefix cannot
    /// be represented in a `u64` length anyway).
    pub fn new(width: usize) -> Self {
        assert!(width > 0 && width <= 19, "prefix width out of range");
        Self { width }
    }

    /// The prefix width in digits.
    pub fn width(&self) -> usize {
        self.width
    }

    fn max_len(&self) -> usize {
        // width nines, e.g. 9999 for width 4
        10usize.saturating_pow(self.width as u32) - 1
    }
}

impl Default for AsciiDecimalHeader {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl LengthHeader for AsciiDecimalHeader {
    async fn read_length(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<usize> {
        let mut buf = vec![0u8; self.width];
        reader.read_exact(&mut buf).await?;

        let text = std::str::from_utf8(&buf).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "length prefix is not ASCII")
        })?;
        text.parse::<usize>().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("length prefix {text:?} is not a decimal number"),
            )
        })
    }

    async fn write_length(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        len: usize,
    ) -> io::Result<()> {
        if len > self.max_len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame body of {len} bytes exceeds {}-digit length prefix",
                    self.width
                ),
            ));
        }
        let prefix = format!("{len:0width$}", width = self.width);
        writer.write_all(prefix.as_bytes()).await
    }
}
