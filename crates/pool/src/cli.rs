use clap::{Parser, ValueEnum};
use contun_proto::{Destination, Mode};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// Every worker proxies to one fixed target declared at startup
    #[default]
    Direct,
    /// Per-session destinations supplied by the hub
    Socks,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Mode {
        match arg {
            ModeArg::Direct => Mode::Direct,
            ModeArg::Socks => Mode::Socks,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "contun-pool")]
#[command(
    version,
    about = "Maintains a pool of outbound worker connections from the bastion to the hub"
)]
pub struct Cli {
    /// Hub hostname or IP address
    #[arg(short = 'j', long = "hub-host", default_value = "127.0.0.1")]
    pub hub_host: String,

    /// Hub port accepting pool workers
    #[arg(short = 'p', long = "hub-port")]
    pub hub_port: u16,

    /// Operation mode
    #[arg(short = 'm', long = "mode", value_enum, default_value = "direct")]
    pub mode: ModeArg,

    /// Target hostname or IP the bastion can reach (direct mode)
    #[arg(short = 't', long = "target-host")]
    pub target_host: Option<String>,

    /// Target port to proxy traffic to (direct mode)
    #[arg(short = 'T', long = "target-port")]
    pub target_port: Option<u16>,

    /// Number of concurrent workers to keep alive
    #[arg(short = 'w', long = "workers", default_value = "4")]
    pub workers: usize,

    /// Seconds to wait before re-dialling the hub after a failure
    #[arg(
        short = 'r',
        long = "retry-delay",
        default_value = "1.0",
        allow_negative_numbers = true
    )]
    pub retry_delay: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--target-host/--target-port are not used in socks mode")]
    TargetInSocksMode,

    #[error("--target-host is required in direct mode")]
    MissingTargetHost,

    #[error("--target-port must be between 1 and 65535")]
    MissingTargetPort,

    #[error("--workers must be positive")]
    NoWorkers,
}

/// Validated pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub hub_host: String,
    pub hub_port: u16,
    pub mode: Mode,
    pub workers: usize,
    pub retry_delay: Duration,
    /// Fixed destination in direct mode; `None` in socks mode.
    pub declared: Option<Destination>,
}

impl PoolConfig {
    pub fn hub_authority(&self) -> String {
        Destination::classify(&self.hub_host, self.hub_port).authority()
    }
}

impl Cli {
    pub fn into_config(self) -> Result<PoolConfig, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let mode = Mode::from(self.mode);
        let declared = match mode {
            Mode::Socks => {
                if self.target_host.is_some() || self.target_port.is_some() {
                    return Err(ConfigError::TargetInSocksMode);
                }
                None
            }
            Mode::Direct => {
                let host = self.target_host.ok_or(ConfigError::MissingTargetHost)?;
                let port = match self.target_port {
                    Some(port) if port > 0 => port,
                    _ => return Err(ConfigError::MissingTargetPort),
                };
                Some(Destination::classify(&host, port))
            }
        };

        // Non-positive delays fall back to the default rather than busy-loop.
        let retry_seconds = if self.retry_delay > 0.0 {
            self.retry_delay
        } else {
            1.0
        };

        Ok(PoolConfig {
            hub_host: self.hub_host,
            hub_port: self.hub_port,
            mode,
            workers: self.workers,
            retry_delay: Duration::from_secs_f64(retry_seconds),
            declared,
        })
    }
}
