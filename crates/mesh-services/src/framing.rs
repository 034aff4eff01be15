//! Async line framing over any byte stream.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use mesh_core::wire::{self, WireError, MAX_FRAME_LEN};

fn invalid(e: WireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Reads newline-delimited frames from `R`.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(512),
        }
    }

    /// Next frame, or `None` once the peer has closed the stream.
    ///
    /// A malformed or oversized line is an `InvalidData` error. The line is
    /// discarded and the reader stays usable.
    ///
    /// Cancel safe: a partially read line stays buffered and the next call
    /// picks it up, so this can sit in a `select!` loop.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        // newline plus an optional carriage return on top of the payload limit
        let max = MAX_FRAME_LEN + 2;
        let limit = max.saturating_sub(self.buf.len()) as u64;
        (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if self.buf.last() != Some(&b'\n') {
            let len = self.buf.len();
            self.buf.clear();
            if len >= max {
                return Err(invalid(WireError::TooLong(len)));
            }
            // clean EOF, or a line truncated by EOF
            return Ok(None);
        }

        let frame = wire::decode(&self.buf).map(Some).map_err(invalid);
        self.buf.clear();
        frame
    }

    /// The underlying stream, for writing on a bidirectional one.
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Unwrap the stream. Bytes already buffered are lost.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Encode and write one frame, then flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = wire::encode(frame).map_err(invalid)?;
    writer.write_all(&line).await?;
    writer.flush().await
}
