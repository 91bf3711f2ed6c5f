//! Controller host strings: `addr`, `addr:port`, `[ipv6]`, `[ipv6]:port`.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("empty host string")]
    Empty,
    #[error("malformed controller address {0:?}")]
    BadAddress(String),
    #[error("invalid port in {0:?} (expected 1..=65535)")]
    BadPort(String),
}

/// Parse a controller host string.
///
/// An explicit port must be in `1..=65535`; an omitted port parses as 0,
/// which the caller fills with its configured default.
pub fn parse_host(host: &str) -> Result<SocketAddr, HostError> {
    if host.is_empty() {
        return Err(HostError::Empty);
    }

    if let Some(rest) = host.strip_prefix('[') {
        let Some((ip, tail)) = rest.split_once(']') else {
            return Err(HostError::BadAddress(host.to_string()));
        };
        let ip: Ipv6Addr = ip
            .parse()
            .map_err(|_| HostError::BadAddress(host.to_string()))?;
        let port = match tail {
            "" => 0,
            _ => {
                let Some(p) = tail.strip_prefix(':') else {
                    return Err(HostError::BadAddress(host.to_string()));
                };
                parse_port(p, host)?
            }
        };
        return Ok(SocketAddr::from((ip, port)));
    }

    // A bare v6 address carries colons of its own, so try it whole first.
    if let Ok(ip) = host.parse::<Ipv6Addr>() {
        return Ok(SocketAddr::from((ip, 0)));
    }

    match host.split_once(':') {
        Some((ip, port)) => {
            let ip: Ipv4Addr = ip
                .parse()
                .map_err(|_| HostError::BadAddress(host.to_string()))?;
            Ok(SocketAddr::from((ip, parse_port(port, host)?)))
        }
        None => {
            let ip: Ipv4Addr = host
                .parse()
                .map_err(|_| HostError::BadAddress(host.to_string()))?;
            Ok(SocketAddr::from((ip, 0)))
        }
    }
}

fn parse_port(s: &str, host: &str) -> Result<u16, HostError> {
    match s.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(HostError::BadPort(host.to_string())),
    }
}
