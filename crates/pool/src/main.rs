use clap::Parser;
use contun_pool::cli::Cli;
use contun_pool::Supervisor;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cfg = match cli.into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(watch_signals(shutdown_tx.clone()));

    if let Err(e) = Supervisor::new(cfg).run(shutdown_tx).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn watch_signals(shutdown: broadcast::Sender<()>) {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    let _ = shutdown.send(());
}
