//! Incremental line framing for the control plane.
//!
//! A [`LineBuffer`] accumulates bytes from a socket and yields complete
//! `\n`-terminated lines (a trailing `\r` is stripped). Bytes read past the
//! last terminator stay in the buffer: after a connection switches to
//! streaming they are the first stream payload and must be handed to the
//! splice, never dropped.

use crate::{Result, TransportError, MAX_BUFFER, READ_CHUNK};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write a control line followed by `\n`.
pub async fn send_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Parse buffer for line-oriented reads over any async byte stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next complete line, pulling more bytes from `reader` as
    /// needed. Returns `Ok(None)` on EOF at a line boundary. EOF mid-line,
    /// a line longer than [`MAX_BUFFER`], and non-UTF-8 content are errors.
    pub async fn next_line<R>(&mut self, reader: &mut R) -> Result<Option<String>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut raw = self.buf.split_to(pos + 1);
                raw.truncate(pos);
                if raw.last() == Some(&b'\r') {
                    raw.truncate(raw.len() - 1);
                }
                let line = String::from_utf8(raw.to_vec())
                    .map_err(|_| TransportError::NonUtf8Line)?;
                return Ok(Some(line));
            }

            if self.buf.len() >= MAX_BUFFER {
                return Err(TransportError::LineTooLong);
            }

            self.buf.reserve(READ_CHUNK);
            let n = reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::TruncatedLine);
            }
        }
    }

    /// Bytes read past the last consumed line. Taking them empties the
    /// buffer.
    pub fn take_leftover(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard buffered bytes (keepalive noise from an idle peer).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn yields_lines_across_split_writes() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"HELLO 1 so").await.unwrap();
        tx.write_all(b"cks\nREQ").await.unwrap();

        let first = lines.next_line(&mut rx).await.unwrap();
        assert_eq!(first.as_deref(), Some("HELLO 1 socks"));

        tx.write_all(b"UEST\n").await.unwrap();
        let second = lines.next_line(&mut rx).await.unwrap();
        assert_eq!(second.as_deref(), Some("REQUEST"));
    }

    #[tokio::test]
    async fn strips_carriage_return() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"OK\r\n").await.unwrap();
        let line = lines.next_line(&mut rx).await.unwrap();
        assert_eq!(line.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"OK\n").await.unwrap();
        drop(tx);

        assert_eq!(lines.next_line(&mut rx).await.unwrap().as_deref(), Some("OK"));
        assert!(lines.next_line(&mut rx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_line_is_an_error() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"REPLY 0").await.unwrap();
        drop(tx);

        assert!(matches!(
            lines.next_line(&mut rx).await,
            Err(TransportError::TruncatedLine)
        ));
    }

    #[tokio::test]
    async fn oversize_line_is_rejected() {
        let (mut tx, mut rx) = duplex(READ_CHUNK);
        let mut lines = LineBuffer::new();

        let writer = tokio::spawn(async move {
            let chunk = vec![b'x'; READ_CHUNK];
            for _ in 0..(MAX_BUFFER / READ_CHUNK + 1) {
                if tx.write_all(&chunk).await.is_err() {
                    return;
                }
            }
        });

        assert!(matches!(
            lines.next_line(&mut rx).await,
            Err(TransportError::LineTooLong)
        ));
        writer.abort();
    }

    #[tokio::test]
    async fn non_utf8_line_is_rejected() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"\xff\xfe\n").await.unwrap();
        assert!(matches!(
            lines.next_line(&mut rx).await,
            Err(TransportError::NonUtf8Line)
        ));
    }

    #[tokio::test]
    async fn leftover_bytes_survive() {
        let (mut tx, mut rx) = duplex(64);
        let mut lines = LineBuffer::new();

        tx.write_all(b"REPLY 0 ipv4 0.0.0.0 0\nstream-payload").await.unwrap();
        let line = lines.next_line(&mut rx).await.unwrap();
        assert_eq!(line.as_deref(), Some("REPLY 0 ipv4 0.0.0.0 0"));

        let leftover = lines.take_leftover();
        assert_eq!(&leftover[..], b"stream-payload");
        assert!(lines.is_empty());
    }
}
