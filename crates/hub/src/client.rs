//! Client-side connection lifecycle: mode wait, SOCKS5 handshake, and entry
//! into the pending queue.
//!
//! Bytes a client sends before it reaches the pending queue are held in its
//! `pending` buffer and become the first stream payload after pairing. Bytes
//! it sends while queued stay in the kernel socket buffer until the session
//! task starts streaming, which preserves arrival order end to end.

use crate::socks5;
use bytes::{Buf, BytesMut};
use contun_proto::{Destination, Mode};
use contun_transport::{MAX_BUFFER, READ_CHUNK};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

/// A client that has completed its control-plane prelude and awaits a worker.
pub struct PendingClient {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// CONNECT destination in socks mode; `None` in direct mode, where the
    /// worker's declared destination is used instead.
    pub dest: Option<Destination>,
    /// Bytes read past the control plane, owed to the worker first.
    pub pending: BytesMut,
}

pub async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut mode_rx: watch::Receiver<Option<Mode>>,
    pending_tx: mpsc::UnboundedSender<PendingClient>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut pending = BytesMut::new();

    let Some(mode) = await_mode(&mut stream, &mut pending, &mut mode_rx, &mut shutdown).await
    else {
        return;
    };

    let dest = match mode {
        Mode::Direct => None,
        Mode::Socks => {
            match socks_handshake(&mut stream, peer, &mut pending, &mut shutdown).await {
                Some(dest) => Some(dest),
                None => return,
            }
        }
    };

    debug!(%peer, "client awaiting worker");
    let _ = pending_tx.send(PendingClient {
        stream,
        peer,
        dest,
        pending,
    });
}

/// Wait until the process mode is committed, stashing any early client bytes.
/// A client may half-close while waiting; reading stops but the wait goes on.
async fn await_mode(
    stream: &mut TcpStream,
    pending: &mut BytesMut,
    mode_rx: &mut watch::Receiver<Option<Mode>>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<Mode> {
    let mut read_open = true;
    loop {
        if let Some(mode) = *mode_rx.borrow_and_update() {
            return Some(mode);
        }
        tokio::select! {
            changed = mode_rx.changed() => {
                changed.ok()?;
            }
            read = read_capped(stream, pending), if read_open => match read {
                Ok(0) => read_open = false,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "client dropped while mode pending");
                    return None;
                }
            },
            _ = shutdown.recv() => return None,
        }
    }
}

/// Append up to a chunk of client bytes to `pending`, enforcing the buffer
/// cap. Returns the byte count (0 on EOF).
async fn read_capped(stream: &mut TcpStream, pending: &mut BytesMut) -> io::Result<usize> {
    pending.reserve(READ_CHUNK);
    let n = stream.read_buf(pending).await?;
    if pending.len() > MAX_BUFFER {
        return Err(io::Error::other("pending buffer cap exceeded"));
    }
    Ok(n)
}

/// Drive the incremental SOCKS5 handshake over `buf`. On success the CONNECT
/// destination is returned and `buf` holds any pipelined payload. On failure
/// the closest reply is sent best-effort and `None` is returned.
async fn socks_handshake(
    stream: &mut TcpStream,
    peer: SocketAddr,
    buf: &mut BytesMut,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<Destination> {
    loop {
        match socks5::parse_greeting(buf) {
            Ok(Some(consumed)) => {
                buf.advance(consumed);
                break;
            }
            Ok(None) => fill(stream, buf, shutdown).await?,
            Err(e) => {
                debug!(%peer, error = %e, "socks greeting rejected");
                let _ = stream
                    .write_all(&socks5::method_selection(socks5::METHOD_NO_ACCEPTABLE))
                    .await;
                return None;
            }
        }
    }

    stream
        .write_all(&socks5::method_selection(socks5::METHOD_NO_AUTH))
        .await
        .ok()?;

    loop {
        match socks5::parse_request(buf) {
            Ok(Some((dest, consumed))) => {
                buf.advance(consumed);
                debug!(%peer, %dest, "socks connect request");
                return Some(dest);
            }
            Ok(None) => fill(stream, buf, shutdown).await?,
            Err(e) => {
                warn!(%peer, error = %e, "socks request rejected");
                let status = e
                    .reply_status()
                    .unwrap_or(contun_proto::status::GENERAL_FAILURE);
                let _ = stream.write_all(&socks5::failure_reply(status)).await;
                return None;
            }
        }
    }
}

/// Pull more handshake bytes, bailing on EOF, cap breach, or shutdown.
async fn fill(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<()> {
    tokio::select! {
        read = read_capped(stream, buf) => match read {
            Ok(0) => {
                debug!("client closed mid-handshake");
                None
            }
            Ok(_) => Some(()),
            Err(e) => {
                debug!(error = %e, "client handshake read failed");
                None
            }
        },
        _ = shutdown.recv() => None,
    }
}
