//! Resolved endpoint addresses: parsing, family ordering and comparison.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// A single concrete endpoint reachable from a resolved [`ResolvedAddr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A UNIX domain socket path.
    Unix(String),
    /// An IPv4/IPv6 socket address.
    Inet(SocketAddr),
}

impl Endpoint {
    /// Family rank used for sorting: UNIX precedes IPv4 precedes IPv6.
    fn family_rank(&self) -> u8 {
        match self {
            Endpoint::Unix(_) => 0,
            Endpoint::Inet(SocketAddr::V4(_)) => 1,
            Endpoint::Inet(SocketAddr::V6(_)) => 2,
        }
    }

    /// Returns a copy of this endpoint with `port` applied; a no-op for UNIX paths.
    fn with_port(&self, port: u16) -> Endpoint {
        match self {
            Endpoint::Unix(p) => Endpoint::Unix(p.clone()),
            Endpoint::Inet(addr) => Endpoint::Inet(SocketAddr::new(addr.ip(), port)),
        }
    }

    /// The port carried by this endpoint, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Unix(_) => None,
            Endpoint::Inet(addr) => Some(addr.port()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{path}"),
            Endpoint::Inet(addr) => write!(f, "{addr}"),
        }
    }
}

/// A resolved address paired with its own error counter.
///
/// `addrs` on an [`crate::upstream::Upstream`] is a non-empty, family-sorted
/// sequence of these; DNS merges carry error counts across resolutions
/// unless the amnesty branch fires (see [`crate::dns`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddr {
    pub endpoint: Endpoint,
    pub errors: u32,
}

impl ResolvedAddr {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, errors: 0 }
    }
}

/// Sorts `addrs` in place by family preference (UNIX > IPv4 > IPv6), stable
/// on ties so that relative discovery order within a family is preserved.
pub fn sort_by_family(addrs: &mut [ResolvedAddr]) {
    addrs.sort_by_key(|a| a.endpoint.family_rank());
}

/// Applies `port` to every `Inet` address in `addrs`, leaving UNIX paths untouched.
///
/// DNS replies never carry a port; this mirrors step 1 of the merge
/// algorithm, which copies the port from the first pre-existing address.
pub fn apply_port(addrs: &mut [ResolvedAddr], port: u16) {
    for a in addrs.iter_mut() {
        a.endpoint = a.endpoint.with_port(port);
    }
}

/// How an upstream spec should be interpreted by [`parse_host_port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// `host[:port][:priority]`, host may be a DNS name, literal IP or UNIX path.
    Default,
    /// Literal IP only, `ip[:port]`; DNS names are rejected.
    Nameserver,
}

/// The literal, not-yet-resolved pieces extracted from an upstream spec string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHost {
    /// A DNS name requiring resolution, with an optional explicit port.
    Name { host: String, port: Option<u16> },
    /// A literal IP address, with an optional explicit port.
    Literal { addr: IpAddr, port: Option<u16> },
    /// A UNIX domain socket path.
    Unix(String),
}

/// Parsed spec: host/literal/unix piece plus an optional priority suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSpec {
    pub host: ParsedHost,
    pub priority: Option<u32>,
}

/// Splits `host[:port][:priority]` (or a UNIX path) per `mode`.
///
/// Bracketed IPv6 (`[::1]:53`) is supported. A UNIX path is recognized by a
/// `unix:` prefix or a leading `/`, and accepts no port/priority suffix.
pub fn parse_host_port(spec: &str, mode: ParseMode) -> Result<ParsedSpec, String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("empty spec".to_string());
    }

    if let Some(path) = spec.strip_prefix("unix:") {
        if mode == ParseMode::Nameserver {
            return Err("unix paths are not valid nameservers".to_string());
        }
        return Ok(ParsedSpec {
            host: ParsedHost::Unix(path.to_string()),
            priority: None,
        });
    }
    if spec.starts_with('/') {
        if mode == ParseMode::Nameserver {
            return Err("unix paths are not valid nameservers".to_string());
        }
        return Ok(ParsedSpec {
            host: ParsedHost::Unix(spec.to_string()),
            priority: None,
        });
    }

    // Bracketed IPv6: `[addr]` optionally followed by `:port` and `:priority`.
    if let Some(rest) = spec.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| "unterminated '[' in IPv6 literal".to_string())?;
        let ip_str = &rest[..close];
        let ip = IpAddr::from_str(ip_str).map_err(|e| format!("invalid IPv6 literal: {e}"))?;
        let tail = &rest[close + 1..];
        let (port, priority) = parse_port_priority_tail(tail)?;
        return Ok(ParsedSpec {
            host: ParsedHost::Literal { addr: ip, port },
            priority,
        });
    }

    // Otherwise: host-or-ip, optionally `:port[:priority]`.
    let parts: Vec<&str> = spec.split(':').collect();
    let (host_str, port, priority) = match parts.len() {
        1 => (parts[0], None, None),
        2 => {
            let port = parts[1]
                .parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {e}", parts[1]))?;
            (parts[0], Some(port), None)
        }
        3 => {
            let port = parts[1]
                .parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {e}", parts[1]))?;
            let priority = parts[2]
                .parse::<u32>()
                .map_err(|e| format!("invalid priority {:?}: {e}", parts[2]))?;
            (parts[0], Some(port), Some(priority))
        }
        _ => return Err(format!("too many ':'-separated fields in {:?}", spec)),
    };

    if let Ok(ip) = IpAddr::from_str(host_str) {
        return Ok(ParsedSpec {
            host: ParsedHost::Literal { addr: ip, port },
            priority,
        });
    }
    if mode == ParseMode::Nameserver {
        return Err(format!("{:?} is not a literal IP", host_str));
    }
    Ok(ParsedSpec {
        host: ParsedHost::Name {
            host: host_str.to_string(),
            port,
        },
        priority,
    })
}

fn parse_port_priority_tail(tail: &str) -> Result<(Option<u16>, Option<u32>), String> {
    if tail.is_empty() {
        return Ok((None, None));
    }
    let tail = tail
        .strip_prefix(':')
        .ok_or_else(|| format!("expected ':' after ']', got {:?}", tail))?;
    let parts: Vec<&str> = tail.split(':').collect();
    match parts.len() {
        1 => {
            let port = parts[0]
                .parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {e}", parts[0]))?;
            Ok((Some(port), None))
        }
        2 => {
            let port = parts[0]
                .parse::<u16>()
                .map_err(|e| format!("invalid port {:?}: {e}", parts[0]))?;
            let priority = parts[1]
                .parse::<u32>()
                .map_err(|e| format!("invalid priority {:?}: {e}", parts[1]))?;
            Ok((Some(port), Some(priority)))
        }
        _ => Err(format!("too many ':'-separated fields after ']': {:?}", tail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_unix_before_v4_before_v6() {
        let mut addrs = vec![
            ResolvedAddr::new(Endpoint::Inet("[::1]:53".parse().unwrap())),
            ResolvedAddr::new(Endpoint::Inet("127.0.0.1:53".parse().unwrap())),
            ResolvedAddr::new(Endpoint::Unix("/tmp/sock".into())),
        ];
        sort_by_family(&mut addrs);
        assert!(matches!(addrs[0].endpoint, Endpoint::Unix(_)));
        assert!(matches!(addrs[1].endpoint, Endpoint::Inet(SocketAddr::V4(_))));
        assert!(matches!(addrs[2].endpoint, Endpoint::Inet(SocketAddr::V6(_))));
    }

    #[test]
    fn apply_port_skips_unix() {
        let mut addrs = vec![
            ResolvedAddr::new(Endpoint::Unix("/tmp/sock".into())),
            ResolvedAddr::new(Endpoint::Inet("127.0.0.1:0".parse().unwrap())),
        ];
        apply_port(&mut addrs, 443);
        assert_eq!(addrs[0].endpoint, Endpoint::Unix("/tmp/sock".into()));
        assert_eq!(addrs[1].endpoint.port(), Some(443));
    }

    #[test]
    fn parses_host_port_priority() {
        let p = parse_host_port("example.com:8080:5", ParseMode::Default).unwrap();
        assert_eq!(p.priority, Some(5));
        match p.host {
            ParsedHost::Name { host, port } => {
                assert_eq!(host, "example.com");
                assert_eq!(port, Some(8080));
            }
            _ => panic!("expected a name"),
        }
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let p = parse_host_port("[::1]:53", ParseMode::Default).unwrap();
        assert_eq!(p.priority, None);
        match p.host {
            ParsedHost::Literal { addr, port } => {
                assert_eq!(addr, IpAddr::from_str("::1").unwrap());
                assert_eq!(port, Some(53));
            }
            _ => panic!("expected a literal"),
        }
    }

    #[test]
    fn parses_unix_path() {
        let p = parse_host_port("/var/run/redis.sock", ParseMode::Default).unwrap();
        assert!(matches!(p.host, ParsedHost::Unix(ref s) if s == "/var/run/redis.sock"));
    }

    #[test]
    fn nameserver_mode_rejects_names() {
        assert!(parse_host_port("example.com", ParseMode::Nameserver).is_err());
        assert!(parse_host_port("8.8.8.8:53", ParseMode::Nameserver).is_ok());
    }
}
