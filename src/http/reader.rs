use embassy_time::{Duration, with_timeout};
use embedded_io_async::Read;

use crate::{Error, Result};

/// Bytes requested from the transport per read.
pub const CHUNK_SIZE: usize = 1024;

/// Pull-based line reader over a connection.
///
/// Lines are returned without their `\r\n`. A line longer than the buffer is handed out in
/// buffer-sized pieces. Once a body length is set, the reader never reads past it.
pub struct RequestReader {
    buffer: [u8; CHUNK_SIZE],
    start: usize,
    end: usize,
    eof: bool,
    body_remaining: Option<usize>,
    read_timeout: Duration,
}

impl RequestReader {
    #[must_use]
    pub const fn new(read_timeout: Duration) -> Self {
        Self {
            buffer: [0; CHUNK_SIZE],
            start: 0,
            end: 0,
            eof: false,
            body_remaining: None,
            read_timeout,
        }
    }

    /// Forget everything from the previous connection.
    pub const fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.eof = false;
        self.body_remaining = None;
    }

    /// Stop reading once `content_length` body bytes have been consumed.
    ///
    /// Call right after the blank line that ends the headers.
    pub fn limit_body(&mut self, content_length: usize) {
        let buffered = self.end.saturating_sub(self.start);
        if buffered >= content_length {
            self.end = self.start.saturating_add(content_length);
            self.body_remaining = Some(0);
        } else {
            self.body_remaining = Some(content_length.saturating_sub(buffered));
        }
    }

    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof && self.start == self.end
    }

    /// Next line, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the read fails or times out, and
    /// [`Error::MalformedRequest`] when the line is not UTF-8.
    pub async fn read_line<R: Read>(&mut self, conn: &mut R) -> Result<Option<&str>> {
        loop {
            let pending = self.buffer.get(self.start..self.end).unwrap_or_default();
            if let Some(offset) = pending.iter().position(|&byte| byte == b'\n') {
                let line_start = self.start;
                let line_end = line_start.saturating_add(offset);
                self.start = line_end.saturating_add(1);
                return self.line(line_start, line_end).map(Some);
            }

            let buffer_full = self.start == 0 && self.end == CHUNK_SIZE;
            if self.eof || buffer_full {
                if self.start == self.end {
                    return Ok(None);
                }
                let (line_start, line_end) = (self.start, self.end);
                self.start = self.end;
                return self.line(line_start, line_end).map(Some);
            }

            if self.start > 0 {
                self.buffer.copy_within(self.start..self.end, 0);
                self.end = self.end.saturating_sub(self.start);
                self.start = 0;
            }
            self.fill(conn).await?;
        }
    }

    async fn fill<R: Read>(&mut self, conn: &mut R) -> Result<()> {
        let mut limit = CHUNK_SIZE.saturating_sub(self.end);
        if let Some(remaining) = self.body_remaining {
            limit = limit.min(remaining);
        }
        if limit == 0 {
            self.eof = true;
            return Ok(());
        }

        let end = self.end;
        let space = self
            .buffer
            .get_mut(end..end.saturating_add(limit))
            .ok_or(Error::CapacityExceeded)?;
        let read = with_timeout(self.read_timeout, conn.read(space))
            .await
            .map_err(|_| {
                warn!("Client read timed out");
                Error::Transport
            })?
            .map_err(|_| Error::Transport)?;

        if read == 0 {
            self.eof = true;
        }
        self.end = end.saturating_add(read);
        if let Some(remaining) = self.body_remaining.as_mut() {
            *remaining = remaining.saturating_sub(read);
        }
        Ok(())
    }

    fn line(&self, start: usize, end: usize) -> Result<&str> {
        let bytes = self.buffer.get(start..end).unwrap_or_default();
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        core::str::from_utf8(bytes).map_err(|_| Error::MalformedRequest("line is not UTF-8"))
    }
}
