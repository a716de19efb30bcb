//! FIFO dispatcher and the per-pair session task.
//!
//! The dispatcher pops one idle worker and one pending client, discarding
//! stale queue entries silently, and hands the pair to a session task. The
//! session drives REQUEST/REPLY on the worker leg, answers the client's
//! SOCKS handshake where applicable, and then splices the pair until both
//! directions finish. A worker that fails mid-session is never reused; the
//! pool redials to replace it.

use crate::client::PendingClient;
use crate::socks5;
use crate::worker::IdleWorker;
use contun_proto::{status, Mode, Reply, Request};
use contun_transport::{send_line, splice, MAX_BUFFER, READ_CHUNK};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub async fn dispatch(
    mut pending_rx: mpsc::UnboundedReceiver<PendingClient>,
    mut idle_rx: mpsc::UnboundedReceiver<IdleWorker>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        let mut worker = tokio::select! {
            _ = shutdown_rx.recv() => break,
            popped = idle_rx.recv() => match popped {
                Some(worker) => worker,
                None => break,
            },
        };
        if !probe_worker(&mut worker) {
            debug!(peer = %worker.peer, "discarding dead idle worker");
            continue;
        }

        let client = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                popped = pending_rx.recv() => match popped {
                    Some(mut client) => {
                        if probe_client(&mut client) {
                            break client;
                        }
                        debug!(peer = %client.peer, "discarding dead pending client");
                    }
                    None => return,
                },
            }
        };

        debug!(client = %client.peer, worker = %worker.peer, "paired");
        tokio::spawn(run_session(client, worker, shutdown.subscribe()));
    }
}

/// Check that an idle worker is still usable. Bytes it sent while queued are
/// keepalive noise and are discarded.
fn probe_worker(worker: &mut IdleWorker) -> bool {
    worker.line.clear();
    let mut scratch = [0u8; 512];
    loop {
        match worker.stream.try_read(&mut scratch) {
            Ok(0) => return false,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}

/// Fold any bytes a queued client has sent into its pending buffer. A client
/// that half-closed is still valid (it may only want the response); one that
/// errored or overran the cap is not.
fn probe_client(client: &mut PendingClient) -> bool {
    loop {
        if client.pending.len() > MAX_BUFFER {
            warn!(peer = %client.peer, "pending buffer cap exceeded");
            return false;
        }
        client.pending.reserve(READ_CHUNK);
        match client.stream.try_read_buf(&mut client.pending) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}

async fn run_session(
    mut client: PendingClient,
    mut worker: IdleWorker,
    mut shutdown: broadcast::Receiver<()>,
) {
    let socks = worker.mode == Mode::Socks;
    let dest = match worker.mode {
        Mode::Socks => client.dest.clone(),
        Mode::Direct => worker.declared.clone(),
    };
    let Some(dest) = dest else {
        fail_client(socks, &mut client, status::GENERAL_FAILURE).await;
        return;
    };

    let request = Request { dest: dest.clone() };
    if let Err(e) = send_line(&mut worker.stream, &request.format()).await {
        debug!(worker = %worker.peer, error = %e, "failed to send request");
        fail_client(socks, &mut client, status::GENERAL_FAILURE).await;
        return;
    }

    let reply_line = tokio::select! {
        _ = shutdown.recv() => return,
        read = worker.line.next_line(&mut worker.stream) => match read {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(worker = %worker.peer, "worker lost before reply");
                fail_client(socks, &mut client, status::GENERAL_FAILURE).await;
                return;
            }
            Err(e) => {
                debug!(worker = %worker.peer, error = %e, "worker reply read failed");
                fail_client(socks, &mut client, status::GENERAL_FAILURE).await;
                return;
            }
        },
    };

    let reply = match Reply::parse(&reply_line) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(worker = %worker.peer, error = %e, "bad reply line");
            fail_client(socks, &mut client, status::GENERAL_FAILURE).await;
            return;
        }
    };

    if reply.status != status::SUCCESS {
        info!(
            client = %client.peer,
            %dest,
            status = reply.status,
            "target connect failed"
        );
        fail_client(socks, &mut client, reply.status).await;
        return;
    }

    if socks {
        let success = socks5::reply(status::SUCCESS, &reply.bind);
        if let Err(e) = client.stream.write_all(&success).await {
            debug!(client = %client.peer, error = %e, "failed to send socks reply");
            return;
        }
    }

    info!(client = %client.peer, worker = %worker.peer, %dest, "streaming");
    let leftover = worker.line.take_leftover();
    let (client_read, client_write) = client.stream.split();
    let (worker_read, worker_write) = worker.stream.split();
    let outcome = tokio::select! {
        _ = shutdown.recv() => {
            debug!(client = %client.peer, "session cancelled");
            return;
        }
        spliced = splice(
            client_read,
            client_write,
            worker_read,
            worker_write,
            &client.pending,
            &leftover,
        ) => spliced,
    };

    match outcome {
        Ok((sent, received)) => debug!(
            client = %client.peer,
            bytes_to_target = sent,
            bytes_to_client = received,
            "session finished"
        ),
        Err(e) => debug!(client = %client.peer, error = %e, "session aborted"),
    }
}

/// Let the client down: in socks mode a well-formed failure reply precedes
/// the close, in direct mode the close is the signal. The worker leg is
/// closed by the caller dropping it.
async fn fail_client(socks: bool, client: &mut PendingClient, reply_status: u8) {
    if socks {
        let _ = client
            .stream
            .write_all(&socks5::failure_reply(reply_status))
            .await;
    }
}
