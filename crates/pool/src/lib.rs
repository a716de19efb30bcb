//! Bastion-side worker pool for contun.
//!
//! Each worker dials out to the hub, declares its mode (and, in direct mode,
//! its fixed target), then services hub-dispatched connect requests on the
//! same control connection until it is closed, redialling with a retry delay
//! on any failure.

pub mod cli;
pub mod error;
pub mod session;
pub mod supervisor;

pub use cli::{Cli, PoolConfig};
pub use error::{PoolError, Result};
pub use supervisor::Supervisor;
