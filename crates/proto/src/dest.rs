//! Destination model: address families, validation, and dial formatting.

use crate::{ProtoError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Operating mode carried on the wire. The hub's `auto` setting is not a wire
/// mode: it means "adopt whatever the first worker declares".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    Socks,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => f.write_str("direct"),
            Mode::Socks => f.write_str("socks"),
        }
    }
}

impl FromStr for Mode {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Mode::Direct),
            "socks" => Ok(Mode::Socks),
            other => Err(ProtoError::UnknownMode(other.to_string())),
        }
    }
}

/// Textual form of a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrType {
    Ipv4,
    Ipv6,
    Domain,
}

impl fmt::Display for AddrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrType::Ipv4 => f.write_str("ipv4"),
            AddrType::Ipv6 => f.write_str("ipv6"),
            AddrType::Domain => f.write_str("domain"),
        }
    }
}

impl FromStr for AddrType {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ipv4" => Ok(AddrType::Ipv4),
            "ipv6" => Ok(AddrType::Ipv6),
            "domain" => Ok(AddrType::Domain),
            other => Err(ProtoError::UnknownAddrType(other.to_string())),
        }
    }
}

/// A connect target: address family, address text, port.
///
/// The port is zero only in REPLY bind fields; connect destinations are
/// validated to 1..=65535.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub addr_type: AddrType,
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(addr_type: AddrType, host: impl Into<String>, port: u16) -> Self {
        Self {
            addr_type,
            host: host.into(),
            port,
        }
    }

    /// Classify a host string into its address family. Anything that does not
    /// parse as an IP literal is treated as a domain name.
    pub fn classify(host: &str, port: u16) -> Self {
        let addr_type = match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => AddrType::Ipv4,
            Ok(IpAddr::V6(_)) => AddrType::Ipv6,
            Err(_) => AddrType::Domain,
        };
        Self::new(addr_type, host, port)
    }

    /// The unspecified ipv4 bind (`0.0.0.0:0`) used on failure replies and as
    /// the default bind address on success replies.
    pub fn null_bind() -> Self {
        Self::new(AddrType::Ipv4, Ipv4Addr::UNSPECIFIED.to_string(), 0)
    }

    /// Check the address text against its declared family and the port range.
    ///
    /// An ipv4-mapped ipv6 literal is rejected as an ipv6 destination; domain
    /// names must be 1..=255 bytes and are otherwise opaque.
    pub fn validate(&self) -> Result<()> {
        match self.addr_type {
            AddrType::Ipv4 => {
                if self.host.parse::<Ipv4Addr>().is_err() {
                    return Err(self.invalid());
                }
            }
            AddrType::Ipv6 => match self.host.parse::<Ipv6Addr>() {
                Ok(v6) if v6.to_ipv4_mapped().is_none() => {}
                _ => return Err(self.invalid()),
            },
            AddrType::Domain => {
                if self.host.is_empty() || self.host.len() > 255 {
                    return Err(self.invalid());
                }
            }
        }
        if self.port == 0 {
            return Err(ProtoError::InvalidPort("0".to_string()));
        }
        Ok(())
    }

    /// `host:port` in the form `TcpStream::connect` accepts; ipv6 literals
    /// are bracketed.
    pub fn authority(&self) -> String {
        match self.addr_type {
            AddrType::Ipv6 => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    fn invalid(&self) -> ProtoError {
        ProtoError::InvalidAddress {
            atype: self.addr_type,
            host: self.host.clone(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_picks_family() {
        assert_eq!(
            Destination::classify("10.0.0.5", 22).addr_type,
            AddrType::Ipv4
        );
        assert_eq!(Destination::classify("::1", 22).addr_type, AddrType::Ipv6);
        assert_eq!(
            Destination::classify("example.com", 80).addr_type,
            AddrType::Domain
        );
    }

    #[test]
    fn validate_ipv4() {
        assert!(Destination::new(AddrType::Ipv4, "203.0.113.9", 443)
            .validate()
            .is_ok());
        assert!(Destination::new(AddrType::Ipv4, "203.0.113.900", 443)
            .validate()
            .is_err());
        assert!(Destination::new(AddrType::Ipv4, "example.com", 443)
            .validate()
            .is_err());
    }

    #[test]
    fn validate_ipv6_rejects_mapped() {
        assert!(Destination::new(AddrType::Ipv6, "2001:db8::1", 443)
            .validate()
            .is_ok());
        assert!(Destination::new(AddrType::Ipv6, "::ffff:1.2.3.4", 443)
            .validate()
            .is_err());
        assert!(Destination::new(AddrType::Ipv6, "1.2.3.4", 443)
            .validate()
            .is_err());
    }

    #[test]
    fn validate_domain_bounds() {
        assert!(Destination::new(AddrType::Domain, "example.com", 80)
            .validate()
            .is_ok());
        assert!(Destination::new(AddrType::Domain, "", 80).validate().is_err());
        assert!(Destination::new(AddrType::Domain, "a".repeat(255), 80)
            .validate()
            .is_ok());
        assert!(Destination::new(AddrType::Domain, "a".repeat(256), 80)
            .validate()
            .is_err());
    }

    #[test]
    fn validate_rejects_port_zero() {
        assert!(Destination::new(AddrType::Ipv4, "127.0.0.1", 0)
            .validate()
            .is_err());
    }

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(
            Destination::new(AddrType::Ipv6, "2001:db8::1", 443).authority(),
            "[2001:db8::1]:443"
        );
        assert_eq!(
            Destination::new(AddrType::Domain, "example.com", 80).authority(),
            "example.com:80"
        );
    }

    #[test]
    fn mode_round_trip() {
        assert_eq!("direct".parse::<Mode>().unwrap(), Mode::Direct);
        assert_eq!("socks".parse::<Mode>().unwrap(), Mode::Socks);
        assert!("auto".parse::<Mode>().is_err());
        assert_eq!(Mode::Socks.to_string(), "socks");
    }
}
