//! Line-delimited JSON framing for the subprocess pipe.
//!
//! Each frame is one JSON object followed by `\n`. This module provides
//! [`LineReader`] and [`LineWriter`] for async reading and writing.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum line size (4 MiB) to prevent unbounded memory allocation.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Reads JSON frames from an async reader.
///
/// A line that fails to parse is logged and skipped; it never affects the
/// lines that follow it in the same chunk.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Read the next well-formed JSON object.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` only on I/O failure.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<serde_json::Value>> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(trimmed) {
                Ok(value) if value.is_object() => return Ok(Some(value)),
                Ok(_) => {
                    tracing::warn!("Skipping non-object JSON line from subprocess");
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed JSON line from subprocess: {e}");
                }
            }
        }
    }

    /// Read one raw line (without the terminator), discarding oversized lines.
    async fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            self.buf.clear();
            let limit = (MAX_LINE_BYTES + 1) as u64;
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 {
                return Ok(None);
            }

            let terminated = self.buf.last() == Some(&b'\n');
            if !terminated && self.buf.len() > MAX_LINE_BYTES {
                tracing::warn!("Discarding subprocess line exceeding {MAX_LINE_BYTES} bytes");
                self.discard_rest_of_line().await?;
                continue;
            }
            if terminated {
                self.buf.pop();
            }
            return Ok(Some(std::mem::take(&mut self.buf)));
        }
    }

    async fn discard_rest_of_line(&mut self) -> std::io::Result<()> {
        let mut sink = Vec::new();
        loop {
            sink.clear();
            let read = (&mut self.reader)
                .take(64 * 1024)
                .read_until(b'\n', &mut sink)
                .await?;
            if read == 0 || sink.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }
}

/// Writes JSON frames to an async writer.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame followed by a newline, then flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}
