//! Bidirectional byte splice with half-close propagation.

use crate::READ_CHUNK;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy bytes both ways between two streams until each direction has seen
/// EOF. EOF on one direction is propagated as a write-shutdown to the other
/// side; the reverse direction keeps flowing until it too ends. Any I/O error
/// aborts the whole splice.
///
/// `a_to_b_prefix` and `b_to_a_prefix` are written before any streamed bytes
/// in their direction, preserving the order of payload that was drawn into
/// parse buffers during the control plane.
///
/// Returns the byte counts copied in each direction, prefixes included.
pub async fn splice<AR, AW, BR, BW>(
    mut a_reader: AR,
    mut a_writer: AW,
    mut b_reader: BR,
    mut b_writer: BW,
    a_to_b_prefix: &[u8],
    b_to_a_prefix: &[u8],
) -> io::Result<(u64, u64)>
where
    AR: AsyncRead + Unpin,
    AW: AsyncWrite + Unpin,
    BR: AsyncRead + Unpin,
    BW: AsyncWrite + Unpin,
{
    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    if !a_to_b_prefix.is_empty() {
        b_writer.write_all(a_to_b_prefix).await?;
        a_to_b += a_to_b_prefix.len() as u64;
    }
    if !b_to_a_prefix.is_empty() {
        a_writer.write_all(b_to_a_prefix).await?;
        b_to_a += b_to_a_prefix.len() as u64;
    }

    let mut a_buf = vec![0u8; READ_CHUNK];
    let mut b_buf = vec![0u8; READ_CHUNK];
    let mut a_open = true;
    let mut b_open = true;

    while a_open || b_open {
        tokio::select! {
            read = a_reader.read(&mut a_buf), if a_open => {
                match read? {
                    0 => {
                        a_open = false;
                        // Peer may already be gone; the reverse direction
                        // decides whether the splice ends.
                        let _ = b_writer.shutdown().await;
                    }
                    n => {
                        b_writer.write_all(&a_buf[..n]).await?;
                        a_to_b += n as u64;
                    }
                }
            }
            read = b_reader.read(&mut b_buf), if b_open => {
                match read? {
                    0 => {
                        b_open = false;
                        let _ = a_writer.shutdown().await;
                    }
                    n => {
                        a_writer.write_all(&b_buf[..n]).await?;
                        b_to_a += n as u64;
                    }
                }
            }
        }
    }

    Ok((a_to_b, b_to_a))
}
