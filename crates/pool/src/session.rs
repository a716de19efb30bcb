//! One worker's hub session: HELLO handshake, then the REQUEST/REPLY loop
//! with target dialling and splicing.

use crate::cli::PoolConfig;
use crate::error::{PoolError, Result};
use contun_proto::{status, Hello, Mode, Reply, Request, HANDSHAKE_OK};
use contun_transport::{connect_timeout, send_line, splice, LineBuffer};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Timeout for dialling the hub and for dialling targets.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive one hub connection until it ends. `Ok(())` means a clean end (hub
/// EOF at a line boundary, or cancellation); errors are protocol or I/O
/// failures the caller logs before redialling.
pub async fn run(
    cfg: &PoolConfig,
    mut hub: TcpStream,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<()> {
    let mut line = LineBuffer::new();

    if !handshake(cfg, &mut hub, &mut line, shutdown).await? {
        return Ok(());
    }

    loop {
        let control = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            read = line.next_line(&mut hub) => read?,
        };
        let Some(control) = control else {
            // Hub closed; normal after it tears down a finished session.
            return Ok(());
        };
        if control.is_empty() {
            continue;
        }

        let request = Request::parse(&control)?;
        let dest = request.dest;

        if let Err(e) = dest.validate() {
            info!(error = %e, "rejecting invalid destination");
            send_reply(&mut hub, Reply::failure(status::GENERAL_FAILURE)).await?;
            continue;
        }

        if cfg.mode == Mode::Direct {
            if let Some(declared) = &cfg.declared {
                if dest != *declared {
                    warn!(requested = %dest, declared = %declared, "rejecting mismatched request");
                    send_reply(&mut hub, Reply::failure(status::GENERAL_FAILURE)).await?;
                    continue;
                }
            }
        }

        let dialled = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            dialled = connect_timeout(dest.authority(), CONNECT_TIMEOUT) => dialled,
        };
        let mut target = match dialled {
            Ok(target) => target,
            Err(e) => {
                let code = dial_error_status(&e);
                info!(%dest, error = %e, status = code, "target dial failed");
                send_reply(&mut hub, Reply::failure(code)).await?;
                continue;
            }
        };

        info!(%dest, "bridging");
        send_reply(&mut hub, Reply::success()).await?;
        if !line.is_empty() {
            // The hub must not send stream payload before our reply.
            return Err(PoolError::EarlyStreamData);
        }

        let (hub_read, hub_write) = hub.split();
        let (target_read, target_write) = target.split();
        let outcome = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            spliced = splice(hub_read, hub_write, target_read, target_write, &[], &[]) => spliced,
        };
        match outcome {
            Ok((sent, received)) => {
                debug!(bytes_to_target = sent, bytes_to_hub = received, "bridge ended");
            }
            Err(e) => debug!(error = %e, "bridge ended with error"),
        }
        // The target drops here; the next REQUEST arrives on the same hub
        // connection if the hub keeps it open.
    }
}

/// Send HELLO and await `OK`. Returns `Ok(false)` when cancelled mid-wait.
async fn handshake(
    cfg: &PoolConfig,
    hub: &mut TcpStream,
    line: &mut LineBuffer,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<bool> {
    let hello = Hello {
        mode: cfg.mode,
        dest: cfg.declared.clone(),
    };
    send_line(hub, &hello.format()).await?;

    let response = tokio::select! {
        _ = shutdown.recv() => return Ok(false),
        read = line.next_line(hub) => read?,
    };
    match response {
        None => Err(PoolError::HandshakeClosed),
        Some(ok) if ok == HANDSHAKE_OK => Ok(true),
        Some(other) => Err(PoolError::HandshakeRejected(other)),
    }
}

async fn send_reply(hub: &mut TcpStream, reply: Reply) -> Result<()> {
    send_line(hub, &reply.format()).await?;
    Ok(())
}

/// Map a target-dial error onto a SOCKS5 reply status.
pub fn dial_error_status(err: &io::Error) -> u8 {
    if let Some(code) = err.raw_os_error() {
        match code {
            libc::ECONNREFUSED => return status::CONNECTION_REFUSED,
            libc::ENETUNREACH => return status::NETWORK_UNREACHABLE,
            libc::EHOSTUNREACH => return status::HOST_UNREACHABLE,
            libc::ETIMEDOUT => return status::HOST_UNREACHABLE,
            _ => {}
        }
    }
    match err.kind() {
        io::ErrorKind::ConnectionRefused => return status::CONNECTION_REFUSED,
        io::ErrorKind::TimedOut => return status::HOST_UNREACHABLE,
        _ => {}
    }
    // Resolver failures come through as opaque errors; classify by message.
    let msg = err.to_string().to_lowercase();
    if msg.contains("lookup") || msg.contains("resolve") || msg.contains("no such host") {
        status::HOST_UNREACHABLE
    } else {
        status::GENERAL_FAILURE
    }
}
