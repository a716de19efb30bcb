//! The hub engine: listeners, the mode gate, and the queue wiring.
//!
//! All hub state lives in one [`Engine`] instance so tests can run several
//! hubs in a single process. The committed mode sits in a watch cell; the
//! pending-client and idle-worker queues are FIFO channels feeding the
//! dispatcher.

use crate::error::Result;
use crate::{client, session, worker};
use contun_proto::Mode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Parsed hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub client_addr: SocketAddr,
    pub pool_addr: SocketAddr,
    /// `None` means auto: adopt the first worker's declared mode.
    pub mode: Option<Mode>,
}

/// Outcome of offering a worker's declared mode to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// First declaration under auto; the mode is now locked.
    Adopted,
    /// Declaration matches the committed mode.
    Matched,
    /// Declaration conflicts with the committed mode.
    Mismatch,
}

/// The process-wide mode cell. Committed exactly once, immutable afterwards.
#[derive(Clone)]
pub struct ModeGate {
    tx: Arc<watch::Sender<Option<Mode>>>,
}

impl ModeGate {
    pub fn new(initial: Option<Mode>) -> Self {
        Self {
            tx: Arc::new(watch::channel(initial).0),
        }
    }

    pub fn committed(&self) -> Option<Mode> {
        *self.tx.borrow()
    }

    /// Receiver for tasks that must wait for the mode to be known.
    pub fn subscribe(&self) -> watch::Receiver<Option<Mode>> {
        self.tx.subscribe()
    }

    /// Offer a worker's declared mode.
    pub fn offer(&self, mode: Mode) -> Commit {
        let mut outcome = Commit::Matched;
        self.tx.send_if_modified(|current| match current {
            Some(active) => {
                if *active != mode {
                    outcome = Commit::Mismatch;
                }
                false
            }
            None => {
                *current = Some(mode);
                outcome = Commit::Adopted;
                true
            }
        });
        outcome
    }
}

/// One hub instance: both listeners plus the state shared by its tasks.
pub struct Engine {
    client_listener: TcpListener,
    pool_listener: TcpListener,
    client_addr: SocketAddr,
    pool_addr: SocketAddr,
    mode: Option<Mode>,
}

impl Engine {
    /// Bind both listeners. Port 0 binds an ephemeral port; the resolved
    /// addresses are available immediately afterwards.
    pub async fn bind(cfg: HubConfig) -> Result<Self> {
        let client_listener = TcpListener::bind(cfg.client_addr).await?;
        let pool_listener = TcpListener::bind(cfg.pool_addr).await?;
        let client_addr = client_listener.local_addr()?;
        let pool_addr = pool_listener.local_addr()?;
        Ok(Self {
            client_listener,
            pool_listener,
            client_addr,
            pool_addr,
            mode: cfg.mode,
        })
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn pool_addr(&self) -> SocketAddr {
        self.pool_addr
    }

    /// Run until the shutdown channel fires. Closes both listeners and all
    /// live connections on the way out.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let gate = ModeGate::new(self.mode);
        match self.mode {
            Some(mode) => info!(%mode, "mode fixed by configuration"),
            None => info!("auto mode: waiting for the first worker to declare"),
        }

        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        let clients = tokio::spawn(accept_clients(
            self.client_listener,
            gate.clone(),
            pending_tx,
            shutdown.clone(),
        ));
        let workers = tokio::spawn(accept_workers(
            self.pool_listener,
            gate,
            idle_tx,
            shutdown.clone(),
        ));

        session::dispatch(pending_rx, idle_rx, shutdown).await;

        let _ = clients.await;
        let _ = workers.await;
        info!("hub stopped");
        Ok(())
    }
}

async fn accept_clients(
    listener: TcpListener,
    gate: ModeGate,
    pending_tx: mpsc::UnboundedSender<client::PendingClient>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    tokio::spawn(client::serve(
                        stream,
                        peer,
                        gate.subscribe(),
                        pending_tx.clone(),
                        shutdown.subscribe(),
                    ));
                }
                Err(e) => warn!(error = %e, "client accept failed"),
            },
        }
    }
}

async fn accept_workers(
    listener: TcpListener,
    gate: ModeGate,
    idle_tx: mpsc::UnboundedSender<worker::IdleWorker>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "worker connected");
                    tokio::spawn(worker::serve(
                        stream,
                        peer,
                        gate.clone(),
                        idle_tx.clone(),
                        shutdown.subscribe(),
                    ));
                }
                Err(e) => warn!(error = %e, "worker accept failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_fixed_mode_rejects_mismatch() {
        let gate = ModeGate::new(Some(Mode::Direct));
        assert_eq!(gate.offer(Mode::Direct), Commit::Matched);
        assert_eq!(gate.offer(Mode::Socks), Commit::Mismatch);
        assert_eq!(gate.committed(), Some(Mode::Direct));
    }

    #[test]
    fn gate_auto_adopts_first_then_locks() {
        let gate = ModeGate::new(None);
        assert_eq!(gate.committed(), None);
        assert_eq!(gate.offer(Mode::Socks), Commit::Adopted);
        assert_eq!(gate.offer(Mode::Socks), Commit::Matched);
        assert_eq!(gate.offer(Mode::Direct), Commit::Mismatch);
        assert_eq!(gate.committed(), Some(Mode::Socks));
    }

    #[test]
    fn gate_notifies_subscribers_on_commit() {
        let gate = ModeGate::new(None);
        let rx = gate.subscribe();
        assert!(rx.borrow().is_none());
        gate.offer(Mode::Direct);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), Some(Mode::Direct));
    }
}
