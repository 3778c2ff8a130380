//! Allow-list validators for values that end up in remote commands.
//!
//! Registry statements bind parameters as quoted literals, but every id,
//! hostname, and address is also checked here first so a malformed value
//! is rejected before anything is sent to a host.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;

/// A value failed allow-list validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} {value:?}: {reason}")]
pub struct ValidationError {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl ValidationError {
    fn new(kind: &'static str, value: &str, reason: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            reason,
        }
    }
}

const MAX_IDENT_LEN: usize = 128;

fn check_charset(
    kind: &'static str,
    value: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(kind, value, "must not be empty"));
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(ValidationError::new(kind, value, "too long"));
    }
    if !value.chars().all(allowed) {
        return Err(ValidationError::new(kind, value, "contains disallowed characters"));
    }
    Ok(())
}

/// Container ids, server ids, and instance ids: `[A-Za-z0-9_.-]`.
pub fn validate_id(value: &str) -> Result<(), ValidationError> {
    check_charset("id", value, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
    })
}

/// Service and project names: `[A-Za-z0-9_-]`, not starting with `-`.
pub fn validate_name(value: &str) -> Result<(), ValidationError> {
    check_charset("name", value, |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))?;
    if value.starts_with('-') {
        return Err(ValidationError::new("name", value, "must not start with '-'"));
    }
    Ok(())
}

/// Hostnames and SSH targets: `[A-Za-z0-9.-]`, optional `user@` prefix
/// is not accepted here (users come from configuration).
pub fn validate_hostname(value: &str) -> Result<(), ValidationError> {
    check_charset("hostname", value, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':')
    })?;
    if value.starts_with('-') || value.starts_with('.') {
        return Err(ValidationError::new("hostname", value, "must start with an alphanumeric"));
    }
    Ok(())
}

/// Any IPv4 or IPv6 address.
pub fn validate_ip(value: &str) -> Result<IpAddr, ValidationError> {
    value
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::new("ip", value, "not an IP address"))
}

/// WireGuard public keys: standard base64 alphabet.
pub fn validate_pubkey(value: &str) -> Result<(), ValidationError> {
    check_charset("public key", value, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
    })
}

/// A reachable endpoint as `ip:port` (`[v6]:port` for IPv6).
pub fn validate_endpoint(value: &str) -> Result<SocketAddr, ValidationError> {
    value
        .parse::<SocketAddr>()
        .map_err(|_| ValidationError::new("endpoint", value, "not an ip:port address"))
}

/// An IPv4 CIDR block, returned as (network, prefix length).
pub fn parse_ipv4_cidr(value: &str) -> Result<(Ipv4Addr, u8), ValidationError> {
    let (addr, prefix) = value
        .split_once('/')
        .ok_or_else(|| ValidationError::new("subnet", value, "missing prefix length"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| ValidationError::new("subnet", value, "not an IPv4 network"))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| ValidationError::new("subnet", value, "prefix must be 0-32"))?;
    Ok((addr, prefix))
}

/// Whether `ip` falls inside the IPv4 `cidr`. Malformed input never matches.
pub fn ipv4_in_cidr(ip: &str, cidr: &str) -> bool {
    let Ok((network, prefix)) = parse_ipv4_cidr(cidr) else {
        return false;
    };
    let Ok(ip) = ip.parse::<Ipv4Addr>() else {
        return false;
    };
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    u32::from(ip) & mask == u32::from(network) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_engine_shapes() {
        assert!(validate_id("3f9a1c2b7d4e").is_ok());
        assert!(validate_id("srv_01.eu-west").is_ok());
    }

    #[test]
    fn ids_reject_injection() {
        assert!(validate_id("abc'; DROP TABLE containers; --").is_err());
        assert!(validate_id("a b").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id(&"a".repeat(200)).is_err());
    }

    #[test]
    fn names() {
        assert!(validate_name("api-gateway").is_ok());
        assert!(validate_name("-rf").is_err());
        assert!(validate_name("api.v2").is_err());
    }

    #[test]
    fn hostnames() {
        assert!(validate_hostname("web-1.example.com").is_ok());
        assert!(validate_hostname("192.168.1.10").is_ok());
        assert!(validate_hostname("-oProxyCommand=x").is_err());
        assert!(validate_hostname("host;rm").is_err());
    }

    #[test]
    fn ips() {
        assert!(validate_ip("10.210.1.4").is_ok());
        assert!(validate_ip("fd00::1").is_ok());
        assert!(validate_ip("10.210.1").is_err());
    }

    #[test]
    fn pubkeys_are_base64() {
        assert!(validate_pubkey("q2lIaWnGqpv4QBrpS+HXnQ0t3Y2YXvW2P1u4VQ1vJ0k=").is_ok());
        assert!(validate_pubkey("pk|x").is_err());
        assert!(validate_pubkey("line\nbreak").is_err());
        assert!(validate_pubkey("").is_err());
    }

    #[test]
    fn endpoints_are_socket_addresses() {
        assert!(validate_endpoint("203.0.113.5:51820").is_ok());
        assert!(validate_endpoint("[fd00::1]:51820").is_ok());
        assert!(validate_endpoint("1.2.3.4:51820|evil").is_err());
        assert!(validate_endpoint("1.2.3.4").is_err());
    }

    #[test]
    fn cidr_membership() {
        assert!(ipv4_in_cidr("10.210.1.7", "10.210.1.0/24"));
        assert!(!ipv4_in_cidr("10.210.2.7", "10.210.1.0/24"));
        assert!(ipv4_in_cidr("1.2.3.4", "0.0.0.0/0"));
        assert!(!ipv4_in_cidr("10.210.1.7", "garbage"));
        assert!(parse_ipv4_cidr("10.0.0.0/33").is_err());
    }
}
