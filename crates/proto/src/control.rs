//! Parse and format for the HELLO / OK / REQUEST / REPLY control lines.

use crate::dest::{AddrType, Destination, Mode};
use crate::{ProtoError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// The only accepted handshake reply. Anything else closes the connection.
pub const HANDSHAKE_OK: &str = "OK";

/// Prefix marking a base64-wrapped address field.
const B64_MARKER: &str = "b64:";

/// Encode an address for a wire line: plain when the host is non-empty ASCII
/// with no whitespace (and cannot be mistaken for the wrapped form),
/// base64-wrapped otherwise.
pub fn encode_addr(host: &str) -> String {
    let plain = !host.is_empty()
        && host.is_ascii()
        && !host.contains(char::is_whitespace)
        && !host.starts_with(B64_MARKER);
    if plain {
        host.to_string()
    } else {
        format!("{B64_MARKER}{}", BASE64.encode(host))
    }
}

/// Decode an address field, accepting both the plain and wrapped variants.
pub fn decode_addr(field: &str) -> Result<String> {
    match field.strip_prefix(B64_MARKER) {
        None => Ok(field.to_string()),
        Some(encoded) => {
            let raw = BASE64
                .decode(encoded)
                .map_err(|_| ProtoError::BadAddressEncoding(field.to_string()))?;
            String::from_utf8(raw).map_err(|_| ProtoError::BadAddressEncoding(field.to_string()))
        }
    }
}

fn parse_port(field: &str, allow_zero: bool) -> Result<u16> {
    let port: u16 = field
        .parse()
        .map_err(|_| ProtoError::InvalidPort(field.to_string()))?;
    if port == 0 && !allow_zero {
        return Err(ProtoError::InvalidPort(field.to_string()));
    }
    Ok(port)
}

fn parse_dest(fields: &[&str], allow_zero_port: bool) -> Result<Destination> {
    let addr_type: AddrType = fields[0].to_ascii_lowercase().parse()?;
    let host = decode_addr(fields[1])?;
    let port = parse_port(fields[2], allow_zero_port)?;
    Ok(Destination::new(addr_type, host, port))
}

/// Worker handshake: `HELLO 1 socks` or `HELLO 1 direct DEST <atype> <addr>
/// <port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub mode: Mode,
    pub dest: Option<Destination>,
}

impl Hello {
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || ProtoError::Malformed {
            kind: "HELLO",
            line: line.to_string(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] != "HELLO" {
            return Err(malformed());
        }
        if fields[1] != "1" {
            return Err(ProtoError::UnsupportedVersion(fields[1].to_string()));
        }
        let mode: Mode = fields[2].to_ascii_lowercase().parse()?;
        match (mode, fields.len()) {
            (Mode::Socks, 3) => Ok(Self { mode, dest: None }),
            (Mode::Direct, 7) if fields[3] == "DEST" => {
                let dest = parse_dest(&fields[4..7], false)?;
                Ok(Self {
                    mode,
                    dest: Some(dest),
                })
            }
            _ => Err(malformed()),
        }
    }

    pub fn format(&self) -> String {
        match &self.dest {
            None => format!("HELLO 1 {}", self.mode),
            Some(dest) => format!(
                "HELLO 1 {} DEST {} {} {}",
                self.mode,
                dest.addr_type,
                encode_addr(&dest.host),
                dest.port
            ),
        }
    }
}

/// Hub dispatch: `REQUEST CONNECT <atype> <addr> <port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub dest: Destination,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 || fields[0] != "REQUEST" || fields[1] != "CONNECT" {
            return Err(ProtoError::Malformed {
                kind: "REQUEST",
                line: line.to_string(),
            });
        }
        let dest = parse_dest(&fields[2..5], false)?;
        Ok(Self { dest })
    }

    pub fn format(&self) -> String {
        format!(
            "REQUEST CONNECT {} {} {}",
            self.dest.addr_type,
            encode_addr(&self.dest.host),
            self.dest.port
        )
    }
}

/// Worker answer: `REPLY <status> <atype> <addr> <port>`, status following
/// SOCKS5 reply semantics. The legacy `ERR <text>` form parses as a general
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub bind: Destination,
}

impl Reply {
    pub fn success() -> Self {
        Self {
            status: crate::status::SUCCESS,
            bind: Destination::null_bind(),
        }
    }

    pub fn failure(status: u8) -> Self {
        Self {
            status,
            bind: Destination::null_bind(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() == Some(&"ERR") {
            return Ok(Self::failure(crate::status::GENERAL_FAILURE));
        }
        if fields.len() != 5 || fields[0] != "REPLY" {
            return Err(ProtoError::Malformed {
                kind: "REPLY",
                line: line.to_string(),
            });
        }
        let status: u8 = fields[1]
            .parse()
            .map_err(|_| ProtoError::Malformed {
                kind: "REPLY",
                line: line.to_string(),
            })?;
        let bind = parse_dest(&fields[2..5], true)?;
        Ok(Self { status, bind })
    }

    pub fn format(&self) -> String {
        format!(
            "REPLY {} {} {} {}",
            self.status,
            self.bind.addr_type,
            encode_addr(&self.bind.host),
            self.bind.port
        )
    }
}
