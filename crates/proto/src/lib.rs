//! Control wire protocol spoken between the contun hub and pool workers.
//!
//! The protocol is line-oriented: `\n`-terminated (a trailing `\r` is
//! tolerated), fields separated by single spaces. Lines are only exchanged
//! before a connection switches to byte streaming; after that the socket is
//! an opaque pipe and nothing here applies.
//!
//! Exchange for one worker:
//!
//! ```text
//! worker -> hub   HELLO 1 socks
//!                 HELLO 1 direct DEST <atype> <addr> <port>
//! hub -> worker   OK
//! hub -> worker   REQUEST CONNECT <atype> <addr> <port>
//! worker -> hub   REPLY <status> <atype> <addr> <port>
//! ```
//!
//! `REPLY` statuses follow SOCKS5 reply semantics. The legacy failure form
//! `ERR <text>` is accepted on ingress as `REPLY 1`.

pub mod control;
pub mod dest;

pub use control::{decode_addr, encode_addr, Hello, Reply, Request, HANDSHAKE_OK};
pub use dest::{AddrType, Destination, Mode};

use thiserror::Error;

/// Current wire protocol version, carried in the HELLO line.
pub const PROTOCOL_VERSION: u32 = 1;

/// SOCKS5 reply statuses used on REPLY lines.
pub mod status {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_FAILURE: u8 = 1;
    pub const NETWORK_UNREACHABLE: u8 = 3;
    pub const HOST_UNREACHABLE: u8 = 4;
    pub const CONNECTION_REFUSED: u8 = 5;
    pub const COMMAND_NOT_SUPPORTED: u8 = 7;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 8;
}

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("malformed {kind} line: {line:?}")]
    Malformed { kind: &'static str, line: String },

    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),

    #[error("unknown mode {0:?}")]
    UnknownMode(String),

    #[error("unknown address type {0:?}")]
    UnknownAddrType(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid {atype} address {host:?}")]
    InvalidAddress { atype: AddrType, host: String },

    #[error("undecodable address field {0:?}")]
    BadAddressEncoding(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
