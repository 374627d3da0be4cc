//! Server address resolution.
//!
//! Accepted forms: `host:port`, `host`, `[v6]:port`, `[v6]` and bare IPv6
//! literals. When the port is omitted the configured default is used.

use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::ReplayError;

/// Split an address string into host and optional port.
pub fn split_host_port(input: &str) -> Result<(&str, Option<u16>), ReplayError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ReplayError::address(input, "empty address"));
    }

    // Bracketed IPv6: [::1] or [::1]:port
    if let Some(rest) = input.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(ReplayError::address(input, "missing closing ']'"));
        };
        if host.is_empty() {
            return Err(ReplayError::address(input, "empty host"));
        }
        return match tail {
            "" => Ok((host, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((host, Some(parse_port(input, port)?))),
                None => Err(ReplayError::address(input, "unexpected text after ']'")),
            },
        };
    }

    // Bare IPv6 literal without a port.
    if input.parse::<IpAddr>().is_ok() {
        return Ok((input, None));
    }

    match input.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ReplayError::address(input, "empty host"));
            }
            Ok((host, Some(parse_port(input, port)?)))
        }
        None => Ok((input, None)),
    }
}

fn parse_port(input: &str, port: &str) -> Result<u16, ReplayError> {
    port.parse::<u16>()
        .map_err(|_| ReplayError::address(input, format!("invalid port '{port}'")))
}

/// Resolve an address string to a connectable socket address.
pub async fn resolve(input: &str, default_port: u16) -> Result<SocketAddr, ReplayError> {
    let (host, port) = split_host_port(input)?;
    let port = port.unwrap_or(default_port);

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| ReplayError::address(input, e.to_string()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| ReplayError::address(input, "host did not resolve"))?;
    debug!(input, %addr, "Resolved server address");
    Ok(addr)
}
