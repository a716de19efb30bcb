use clap::{Parser, ValueEnum};
use contun_proto::Mode;
use std::net::{IpAddr, SocketAddr};

/// Operating mode for the hub. `auto` adopts the mode the first worker
/// declares and locks it for the process lifetime.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    #[default]
    Auto,
    Direct,
    Socks,
}

impl ModeArg {
    /// The pre-committed mode, or `None` for `auto`.
    pub fn fixed(self) -> Option<Mode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::Direct => Some(Mode::Direct),
            ModeArg::Socks => Some(Mode::Socks),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "contun-hub")]
#[command(
    version,
    about = "Jump-side multiplexer: accepts downstream clients and pairs them with bastion pool workers"
)]
pub struct Cli {
    /// Address the client listener binds to
    #[arg(short = 'C', long = "client-bind", default_value = "127.0.0.1")]
    pub client_bind: IpAddr,

    /// Port accepting downstream client connections
    #[arg(short = 'c', long = "client-port")]
    pub client_port: u16,

    /// Address the pool listener binds to
    #[arg(short = 'P', long = "pool-bind", default_value = "0.0.0.0")]
    pub pool_bind: IpAddr,

    /// Port accepting pool worker connections
    #[arg(short = 'p', long = "pool-port")]
    pub pool_port: u16,

    /// Operating mode
    #[arg(short = 'm', long = "mode", value_enum, default_value = "auto")]
    pub mode: ModeArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.client_bind, self.client_port)
    }

    pub fn pool_addr(&self) -> SocketAddr {
        SocketAddr::new(self.pool_bind, self.pool_port)
    }
}
