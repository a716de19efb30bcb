//! Incremental SOCKS5 front end: no-auth, CONNECT only.
//!
//! Parsing works over a byte buffer and only advances once the next
//! structural segment is fully present, so a client may trickle the
//! handshake in arbitrarily small writes. RFC 1928 wire layout; the
//! extracted destination is relayed to a pool worker verbatim, never dialled
//! locally.

use contun_proto::{status, AddrType, Destination};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

pub const SOCKS_VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SocksError {
    #[error("unsupported socks version {0:#04x}")]
    BadVersion(u8),

    #[error("no acceptable authentication method offered")]
    NoAcceptableMethod,

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddrType(u8),

    #[error("zero-length domain name")]
    EmptyDomain,

    #[error("domain name is not valid utf-8")]
    NonUtf8Domain,

    #[error("destination port is zero")]
    ZeroPort,
}

impl SocksError {
    /// The reply status to send before closing, if the protocol stage allows
    /// a structured reply at all (the greeting stage answers with the
    /// no-acceptable-method selection instead).
    pub fn reply_status(&self) -> Option<u8> {
        match self {
            SocksError::BadVersion(_) | SocksError::NoAcceptableMethod => None,
            SocksError::UnsupportedCommand(_) => Some(status::COMMAND_NOT_SUPPORTED),
            SocksError::UnsupportedAddrType(_) => Some(status::ADDRESS_TYPE_NOT_SUPPORTED),
            // A zero-length domain is an invalid address, not an unsupported
            // address type.
            SocksError::EmptyDomain
            | SocksError::NonUtf8Domain
            | SocksError::ZeroPort => Some(status::GENERAL_FAILURE),
        }
    }
}

/// Parse the client greeting `{05, n_methods, methods[n]}`. Returns the
/// number of bytes consumed once the greeting is complete and contains the
/// no-auth method, `None` while incomplete.
pub fn parse_greeting(buf: &[u8]) -> Result<Option<usize>, SocksError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != SOCKS_VERSION {
        return Err(SocksError::BadVersion(buf[0]));
    }
    if buf.len() < 2 {
        return Ok(None);
    }
    let n_methods = buf[1] as usize;
    if n_methods == 0 {
        return Err(SocksError::NoAcceptableMethod);
    }
    if buf.len() < 2 + n_methods {
        return Ok(None);
    }
    let methods = &buf[2..2 + n_methods];
    if !methods.contains(&METHOD_NO_AUTH) {
        return Err(SocksError::NoAcceptableMethod);
    }
    Ok(Some(2 + n_methods))
}

/// Parse the CONNECT request `{05, 01, 00, atyp, addr, port}`. Returns the
/// destination and bytes consumed once complete, `None` while incomplete.
/// Numeric addresses decode to canonical text; domains pass through.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Destination, usize)>, SocksError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != SOCKS_VERSION {
        return Err(SocksError::BadVersion(buf[0]));
    }
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[1] != CMD_CONNECT {
        return Err(SocksError::UnsupportedCommand(buf[1]));
    }
    if buf.len() < 4 {
        return Ok(None);
    }

    let (addr_type, host, addr_end) = match buf[3] {
        ATYP_IPV4 => {
            if buf.len() < 8 {
                return Ok(None);
            }
            let octets: [u8; 4] = buf[4..8].try_into().unwrap_or([0; 4]);
            (AddrType::Ipv4, Ipv4Addr::from(octets).to_string(), 8)
        }
        ATYP_IPV6 => {
            if buf.len() < 20 {
                return Ok(None);
            }
            let octets: [u8; 16] = buf[4..20].try_into().unwrap_or([0; 16]);
            (AddrType::Ipv6, Ipv6Addr::from(octets).to_string(), 20)
        }
        ATYP_DOMAIN => {
            if buf.len() < 5 {
                return Ok(None);
            }
            let len = buf[4] as usize;
            if len == 0 {
                return Err(SocksError::EmptyDomain);
            }
            if buf.len() < 5 + len {
                return Ok(None);
            }
            let host = std::str::from_utf8(&buf[5..5 + len])
                .map_err(|_| SocksError::NonUtf8Domain)?
                .to_string();
            (AddrType::Domain, host, 5 + len)
        }
        other => return Err(SocksError::UnsupportedAddrType(other)),
    };

    if buf.len() < addr_end + 2 {
        return Ok(None);
    }
    let port = u16::from_be_bytes([buf[addr_end], buf[addr_end + 1]]);
    if port == 0 {
        return Err(SocksError::ZeroPort);
    }

    Ok(Some((
        Destination::new(addr_type, host, port),
        addr_end + 2,
    )))
}

/// The two-byte method selection reply.
pub fn method_selection(method: u8) -> [u8; 2] {
    [SOCKS_VERSION, method]
}

/// Build a reply `{05, status, 00, atyp, bnd.addr, bnd.port}` for the given
/// bind address (the one the worker supplied; `0.0.0.0:0` in the usual case).
pub fn reply(reply_status: u8, bind: &Destination) -> Vec<u8> {
    let mut out = vec![SOCKS_VERSION, reply_status, 0x00];
    match bind.addr_type {
        AddrType::Ipv4 => {
            let addr: Ipv4Addr = bind.host.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
            out.push(ATYP_IPV4);
            out.extend_from_slice(&addr.octets());
        }
        AddrType::Ipv6 => {
            let addr: Ipv6Addr = bind.host.parse().unwrap_or(Ipv6Addr::UNSPECIFIED);
            out.push(ATYP_IPV6);
            out.extend_from_slice(&addr.octets());
        }
        AddrType::Domain => {
            let bytes = bind.host.as_bytes();
            let len = bytes.len().min(255);
            out.push(ATYP_DOMAIN);
            out.push(len as u8);
            out.extend_from_slice(&bytes[..len]);
        }
    }
    out.extend_from_slice(&bind.port.to_be_bytes());
    out
}

/// The fixed-shape failure reply `{05, status, 00, 01, 0.0.0.0, 0}`.
pub fn failure_reply(reply_status: u8) -> Vec<u8> {
    reply(clamp_status(reply_status), &Destination::null_bind())
}

/// Map an arbitrary REPLY status onto the SOCKS reply byte set the front end
/// emits.
pub fn clamp_status(s: u8) -> u8 {
    match s {
        0 | 1 | 3 | 4 | 5 | 7 | 8 => s,
        _ => status::GENERAL_FAILURE,
    }
}
