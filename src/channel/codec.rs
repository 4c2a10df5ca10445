//! Newline-delimited framing shared by the control channel and the
//! session output pumps.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] with a configurable maximum
//! line length so an unterminated or oversized line from a misbehaving peer
//! or process cannot exhaust memory. Bytes are decoded lossily: invalid UTF-8
//! becomes `U+FFFD` instead of an error.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

use crate::{AppError, Result};

/// Maximum line length accepted by [`LineCodec::new`]: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Lossy UTF-8 line decoder delimited by `\n`.
///
/// A trailing `\r` is stripped. Lines longer than the limit return
/// [`AppError::Protocol`]`("line too long: …")`; the codec then discards
/// the rest of that line and resumes at the next delimiter. I/O errors map
/// to [`AppError::Io`].
#[derive(Debug)]
pub struct LineCodec {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl LineCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_length),
            max_length,
        }
    }

    fn map_error(&self, e: AnyDelimiterCodecError) -> AppError {
        match e {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => AppError::Protocol(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )),
            AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_line(chunk: Bytes) -> String {
    let bytes = chunk.strip_suffix(b"\r").unwrap_or(&chunk[..]);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let chunk = self.inner.decode(src).map_err(|e| self.map_error(e))?;
        Ok(chunk.map(to_line))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let chunk = self.inner.decode_eof(src).map_err(|e| self.map_error(e))?;
        Ok(chunk.map(to_line))
    }
}
