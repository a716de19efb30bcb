//! Keeps exactly W workers alive, each redialling the hub on its own
//! schedule.

use crate::cli::PoolConfig;
use crate::error::Result;
use crate::session;
use contun_transport::connect_timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Instrument};

pub struct Supervisor {
    cfg: Arc<PoolConfig>,
}

impl Supervisor {
    pub fn new(cfg: PoolConfig) -> Self {
        Self { cfg: Arc::new(cfg) }
    }

    /// Launch the workers and block until they have all exited (which they
    /// only do on cancellation).
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        info!(
            workers = self.cfg.workers,
            mode = %self.cfg.mode,
            hub = %self.cfg.hub_authority(),
            "starting pool"
        );
        if let Some(dest) = &self.cfg.declared {
            info!(target = %dest, "direct mode destination");
        }

        let mut handles = Vec::with_capacity(self.cfg.workers);
        for id in 1..=self.cfg.workers {
            let cfg = self.cfg.clone();
            let rx = shutdown.subscribe();
            let span = tracing::info_span!("worker", id);
            handles.push(tokio::spawn(worker_loop(cfg, rx).instrument(span)));
        }
        drop(shutdown);

        for handle in handles {
            let _ = handle.await;
        }
        info!("pool stopped");
        Ok(())
    }
}

/// One worker: dial the hub, run a session, sleep, redial. Exits only on
/// cancellation.
async fn worker_loop(cfg: Arc<PoolConfig>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let dialled = tokio::select! {
            _ = shutdown.recv() => return,
            dialled = connect_timeout(cfg.hub_authority(), session::CONNECT_TIMEOUT) => dialled,
        };
        match dialled {
            Err(e) => {
                warn!(error = %e, "failed to connect to hub");
            }
            Ok(hub) => {
                info!("connected to hub");
                match session::run(&cfg, hub, &mut shutdown).await {
                    Ok(()) => info!("session ended"),
                    Err(e) => warn!(error = %e, "session error"),
                }
            }
        }
        if !sleep_retry(cfg.retry_delay, &mut shutdown).await {
            return;
        }
    }
}

/// Cancellation-aware retry sleep. Returns `false` when shutdown fired.
async fn sleep_retry(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.recv() => false,
    }
}
