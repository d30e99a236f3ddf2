//! Transport endpoints.
//!
//! Only TCP is supported. Endpoints are written `tcp://host:port`; the bare
//! `host:port` form is accepted too. A host of `*` binds every interface;
//! such a listener must announce an explicit identity.

use crate::error::WireError;
use std::fmt;
use std::str::FromStr;

const TCP_SCHEME: &str = "tcp://";

/// A parsed TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host, different port. Used to resolve `:0` after binding.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }

    /// `host:port` as accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the host is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.host == "*"
    }

    /// `host:port` for `TcpListener::bind`, with `*` mapped to all interfaces.
    pub fn bind_address(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.address()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TCP_SCHEME}{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| WireError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = match s.strip_prefix(TCP_SCHEME) {
            Some(rest) => rest,
            None if s.contains("://") => return Err(invalid("only tcp:// is supported")),
            None => s,
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_endpoint() {
        let ep: Endpoint = "tcp://127.0.0.1:5555".parse().unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 5555);
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_bare_address_is_normalized() {
        let ep: Endpoint = "localhost:9000".parse().unwrap();
        assert_eq!(ep.to_string(), "tcp://localhost:9000");
        assert_eq!(ep.address(), "localhost:9000");
    }

    #[test]
    fn test_ipv6_host() {
        let ep: Endpoint = "tcp://[::1]:7000".parse().unwrap();
        assert_eq!(ep.host(), "[::1]");
        assert_eq!(ep.port(), 7000);
    }

    #[test]
    fn test_wildcard_bind_address() {
        let ep: Endpoint = "tcp://*:5555".parse().unwrap();
        assert!(ep.is_wildcard());
        assert_eq!(ep.bind_address(), "0.0.0.0:5555");
        assert_eq!(ep.address(), "*:5555");
    }

    #[test]
    fn test_rejects_other_schemes() {
        let err = "ipc://server1.ipc".parse::<Endpoint>().unwrap_err();
        assert!(matches!(err, WireError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!("tcp://host:http".parse::<Endpoint>().is_err());
        assert!("tcp://host:70000".parse::<Endpoint>().is_err());
        assert!("tcp://:5555".parse::<Endpoint>().is_err());
        assert!("no-port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_with_port_keeps_host() {
        let ep: Endpoint = "tcp://localhost:0".parse().unwrap();
        assert_eq!(ep.with_port(41000).to_string(), "tcp://localhost:41000");
    }
}
