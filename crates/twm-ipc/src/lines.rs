//! Incremental line decoding over an async byte source
//!
//! The tool's stdout arrives in arbitrary chunks. `LineDecoder` reads it
//! through a `BufReader`, keeps the bytes of an unfinished record until the
//! rest shows up, and hands out one complete line at a time.

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::{TransportError, TruncatedStreamWarning};

/// Capacity of the read buffer in front of the source
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Policy for unterminated bytes left over at end of stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingLine {
    /// Hand the leftover bytes out as a final line
    #[default]
    Emit,
    /// Drop them and report a `TruncatedStreamWarning`
    Discard,
}

/// One item produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    /// A line with its `\n` or `\r\n` terminator stripped
    Complete(String),
    /// A line that is not valid UTF-8, terminator stripped, bytes untouched
    Invalid(Vec<u8>),
    /// Trailing bytes were discarded under `TrailingLine::Discard`
    Truncated(TruncatedStreamWarning),
}

/// Splits an async byte stream into lines
///
/// Lines are never altered: a line that is not valid UTF-8 comes out as
/// `DecodedLine::Invalid` and is rejected one level up by `parse_bytes`.
///
/// `next_line` is cancel-safe: bytes of a partly read line stay in the
/// decoder and the next call picks up where the dropped one stopped.
#[derive(Debug)]
pub struct LineDecoder<R> {
    reader: BufReader<R>,
    /// Bytes of the current line read so far
    pending: Vec<u8>,
    trailing: TrailingLine,
    eof: bool,
}

impl<R> LineDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, trailing: TrailingLine) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            pending: Vec::new(),
            trailing,
            eof: false,
        }
    }

    /// Read until the next complete line is available
    ///
    /// Returns `Ok(None)` once the source is exhausted and every buffered
    /// byte has been handed out. A read of zero bytes is end-of-stream under
    /// the `AsyncRead` contract and never produces an empty line by itself.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Read` if the underlying source fails.
    pub async fn next_line(&mut self) -> Result<Option<DecodedLine>, TransportError> {
        if self.eof {
            return Ok(None);
        }

        loop {
            match self.reader.read_until(b'\n', &mut self.pending).await {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }

        let bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\n') {
            return Ok(Some(into_line(bytes)));
        }

        // read_until only stops short of a newline at end of input
        self.eof = true;
        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(match self.trailing {
            TrailingLine::Emit => into_line(bytes),
            TrailingLine::Discard => {
                DecodedLine::Truncated(TruncatedStreamWarning { bytes: bytes.len() })
            }
        }))
    }

    /// Adapt the decoder into a `Stream`
    ///
    /// The stream ends at end-of-input or right after yielding a read error.
    pub fn into_stream(self) -> impl Stream<Item = Result<DecodedLine, TransportError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(decoder))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn into_line(mut bytes: Vec<u8>) -> DecodedLine {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }

    match String::from_utf8(bytes) {
        Ok(line) => DecodedLine::Complete(line),
        Err(e) => DecodedLine::Invalid(e.into_bytes()),
    }
}
