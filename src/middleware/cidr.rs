//! IP range parsing and matching.
//!
//! Accepted range syntax:
//!
//! | Input | Networks |
//! |---|---|
//! | `10.0.0.0/8`, `2001:db8::/32` | as written, host bits cleared |
//! | `192.168.1.1` | `192.168.1.1/32` |
//! | `fe80::1` | `fe80::1/128` |
//! | `localhost`, `loopback` | `::1/128` and `127.0.0.0/8` |
//!
//! Loopback is dual-stack: a range whose network address is the IPv4
//! loopback also admits `::1`, and `::1` also admits `127.0.0.0/8`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::error::ConfigError;

/// An ordered list of networks an address may belong to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CidrSet {
    networks: Vec<IpNetwork>,
}

impl CidrSet {
    /// Parses and normalizes every range. Any invalid range fails the whole set.
    pub fn parse<I, S>(ranges: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for range in ranges {
            let network = parse_range(range.as_ref())?;
            set.push(network);
            if let Some(companion) = loopback_companion(&network) {
                set.push(companion);
            }
        }
        Ok(set)
    }

    fn push(&mut self, network: IpNetwork) {
        if !self.networks.contains(&network) {
            self.networks.push(network);
        }
    }

    /// `true` when any network contains `ip`. Stops at the first match.
    ///
    /// An IPv4-mapped IPv6 address (`::ffff:a.b.c.d`, as reported by a
    /// dual-stack listener) is matched as the IPv4 address it carries.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
            v4 => v4,
        };
        self.networks.iter().any(|net| net.contains(ip))
    }

    pub fn networks(&self) -> &[IpNetwork] { &self.networks }
    pub fn len(&self) -> usize { self.networks.len() }
    pub fn is_empty(&self) -> bool { self.networks.is_empty() }
}

fn parse_range(range: &str) -> Result<IpNetwork, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRange { range: range.to_owned(), reason };

    let cidr = match range.trim() {
        "localhost" | "loopback" => "::1/128".to_owned(),
        s if s.contains('/') => s.to_owned(),
        s if s.contains('.') => format!("{s}/32"),
        s if s.contains(':') => format!("{s}/128"),
        _ => return Err(invalid("neither an ipv4 nor an ipv6 address".to_owned())),
    };

    let parsed: IpNetwork = cidr.parse().map_err(|e: ipnetwork::IpNetworkError| invalid(e.to_string()))?;
    IpNetwork::new(parsed.network(), parsed.prefix()).map_err(|e| invalid(e.to_string()))
}

fn loopback_companion(network: &IpNetwork) -> Option<IpNetwork> {
    match network.network() {
        IpAddr::V4(addr) if addr.is_loopback() => IpNetwork::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 128).ok(),
        IpAddr::V6(addr) if addr.is_loopback() => IpNetwork::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8).ok(),
        _ => None,
    }
}

/// Extracts an address from a `host:port` string as found in a peer address
/// or a forwarding header.
///
/// Quotes and brackets are removed anywhere in the input, then everything
/// from the last `:` on is dropped. Input without a `:` yields `None`.
///
/// ```rust
/// use gatehouse::middleware::cidr::parse_candidate;
///
/// assert_eq!(parse_candidate("127.0.0.1:1234"), Some("127.0.0.1".parse().unwrap()));
/// assert_eq!(parse_candidate("[::1]:57048"), Some("::1".parse().unwrap()));
/// assert_eq!(parse_candidate("127.0.0.1"), None);
/// ```
pub fn parse_candidate(raw: &str) -> Option<IpAddr> {
    let cleaned: String = raw.trim().chars().filter(|c| !matches!(c, '"' | '[' | ']')).collect();
    let (host, _port) = cleaned.rsplit_once(':')?;
    host.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn bare_addresses_get_a_host_prefix() {
        assert_eq!(CidrSet::parse(["192.168.1.1"]).unwrap().networks(), [net("192.168.1.1/32")]);
        assert_eq!(CidrSet::parse(["fe80::1"]).unwrap().networks(), [net("fe80::1/128")]);
    }

    #[test]
    fn host_bits_are_cleared() {
        assert_eq!(CidrSet::parse(["10.1.2.3/8"]).unwrap().networks(), [net("10.0.0.0/8")]);
    }

    #[test]
    fn ipv6_loopback_expands_to_ipv4_block() {
        let set = CidrSet::parse(["::1"]).unwrap();
        assert_eq!(set.networks(), [net("::1/128"), net("127.0.0.0/8")]);
    }

    #[test]
    fn ipv4_loopback_expands_to_ipv6_host() {
        let set = CidrSet::parse(["127.0.0.1/32"]).unwrap();
        assert_eq!(set.networks(), [net("127.0.0.1/32"), net("::1/128")]);
    }

    #[test]
    fn localhost_tokens() {
        for token in ["localhost", "loopback"] {
            let set = CidrSet::parse([token]).unwrap();
            assert_eq!(set.networks(), [net("::1/128"), net("127.0.0.0/8")]);
        }
    }

    #[test]
    fn duplicate_networks_are_kept_once() {
        let set = CidrSet::parse(["localhost", "::1", "127.0.0.0/8"]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        for bad in ["abcdefg", "999.999.999", "10.0.0.0/33", "::1/129", "not/a/range"] {
            assert!(
                matches!(CidrSet::parse([bad]), Err(ConfigError::InvalidRange { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(CidrSet::parse(["10.0.0.0/8", "hijklmnop"]).is_err());
    }

    #[test]
    fn membership() {
        let v4 = CidrSet::parse(["127.0.0.1/32"]).unwrap();
        let v6 = CidrSet::parse(["::1/128"]).unwrap();

        assert!(v4.contains(ip("127.0.0.1")));
        assert!(v4.contains(ip("::1")));
        assert!(v6.contains(ip("::1")));
        assert!(v6.contains(ip("127.0.0.1")));
        assert!(v6.contains(ip("127.1.0.1")));
        assert!(v6.contains(ip("127.255.0.1")));
        assert!(!v6.contains(ip("128.0.0.1")));
        assert!(!v6.contains(ip("126.0.0.1")));

        let single = CidrSet::parse(["192.168.1.1"]).unwrap();
        assert!(single.contains(ip("::ffff:192.168.1.1")));
        assert!(single.contains(ip("192.168.1.1")));
        assert!(!single.contains(ip("192.168.1.2")));
    }

    #[test]
    fn ipv4_mapped_addresses_match_ipv4_networks() {
        let local = CidrSet::parse(["localhost"]).unwrap();
        assert!(local.contains(ip("::ffff:127.0.0.1")));

        let private = CidrSet::parse(["10.0.0.0/8"]).unwrap();
        assert!(private.contains(ip("::ffff:10.1.2.3")));
        assert!(!private.contains(ip("::ffff:11.1.2.3")));

        let v6_only = CidrSet::parse(["2001:db8::/32"]).unwrap();
        assert!(!v6_only.contains(ip("::ffff:10.1.2.3")));
    }

    #[test]
    fn candidates() {
        assert_eq!(parse_candidate("127.0.0.1:1234"), Some(ip("127.0.0.1")));
        assert_eq!(parse_candidate("\"127.0.0.1:1234\""), Some(ip("127.0.0.1")));
        assert_eq!(parse_candidate("[::1]:57048"), Some(ip("::1")));
        assert_eq!(parse_candidate("\"[::1]\":57048"), Some(ip("::1")));
        assert_eq!(parse_candidate("[::ffff:127.0.0.1]:40000"), Some(ip("::ffff:127.0.0.1")));
        assert_eq!(parse_candidate("aabbccd"), None);
        assert_eq!(parse_candidate("aabb:cc"), None);
        assert_eq!(parse_candidate(""), None);
    }
}
