//! Stream plumbing shared by the hub and the pool: incremental line framing
//! for the control plane, the bidirectional splice used once a pairing
//! switches to streaming, and dialling with a timeout.

pub mod line;
pub mod splice;

pub use line::{send_line, LineBuffer};
pub use splice::splice;

use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Hard cap on any single parse or pending buffer. A control line longer than
/// this without a terminator, or a pending buffer that would grow past it,
/// tears the connection down.
pub const MAX_BUFFER: usize = 1024 * 1024;

/// Bytes pulled from a socket per read while streaming.
pub const READ_CHUNK: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("control line exceeds {MAX_BUFFER} bytes without a terminator")]
    LineTooLong,

    #[error("connection closed mid-line")]
    TruncatedLine,

    #[error("control line is not valid utf-8")]
    NonUtf8Line,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Dial `addr`, failing with `TimedOut` if the connection is not established
/// within `timeout`.
pub async fn connect_timeout<A>(addr: A, timeout: Duration) -> io::Result<TcpStream>
where
    A: ToSocketAddrs,
{
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connect timed out",
        )),
    }
}
