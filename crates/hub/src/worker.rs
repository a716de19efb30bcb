//! Worker-side connection lifecycle: HELLO handshake, mode gating, and entry
//! into the idle queue.

use crate::engine::{Commit, ModeGate};
use contun_proto::{Destination, Hello, Mode, HANDSHAKE_OK};
use contun_transport::{send_line, LineBuffer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How long a freshly connected worker gets to complete its HELLO.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A registered worker waiting to be paired.
pub struct IdleWorker {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub mode: Mode,
    /// Fixed destination declared in the HELLO (direct mode only).
    pub declared: Option<Destination>,
    /// Line framing state, carried so post-REPLY bytes are not lost.
    pub line: LineBuffer,
}

pub async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    gate: ModeGate,
    idle_tx: mpsc::UnboundedSender<IdleWorker>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut line = LineBuffer::new();

    let hello_line = tokio::select! {
        _ = shutdown.recv() => return,
        read = tokio::time::timeout(HANDSHAKE_TIMEOUT, line.next_line(&mut stream)) => {
            match read {
                Err(_) => {
                    debug!(%peer, "worker handshake timed out");
                    return;
                }
                Ok(Err(e)) => {
                    debug!(%peer, error = %e, "worker handshake failed");
                    return;
                }
                Ok(Ok(None)) => {
                    debug!(%peer, "worker closed before HELLO");
                    return;
                }
                Ok(Ok(Some(l))) => l,
            }
        }
    };

    let hello = match Hello::parse(&hello_line) {
        Ok(hello) => hello,
        Err(e) => {
            warn!(%peer, error = %e, "rejecting worker");
            return;
        }
    };
    if let Some(dest) = &hello.dest {
        if let Err(e) = dest.validate() {
            warn!(%peer, error = %e, "rejecting worker: bad declared destination");
            return;
        }
    }

    match gate.offer(hello.mode) {
        Commit::Adopted => info!(mode = %hello.mode, "mode adopted from first worker"),
        Commit::Matched => {}
        Commit::Mismatch => {
            warn!(
                %peer,
                declared = %hello.mode,
                "worker mode mismatch, closing"
            );
            return;
        }
    }

    if let Err(e) = send_line(&mut stream, HANDSHAKE_OK).await {
        debug!(%peer, error = %e, "failed to ack worker handshake");
        return;
    }

    info!(%peer, mode = %hello.mode, "worker registered");
    let _ = idle_tx.send(IdleWorker {
        stream,
        peer,
        mode: hello.mode,
        declared: hello.dest,
        line,
    });
}
