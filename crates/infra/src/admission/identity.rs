//! Client identity derivation for rate limiting.
//!
//! Forwarding headers are only honoured when the direct peer is a configured
//! trusted proxy; otherwise any client could pick its own bucket by sending
//! `X-Forwarded-For`.

use std::net::IpAddr;
use std::str::FromStr;

/// Error parsing a trusted-proxy entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid network {value:?}: {reason}")]
pub struct InvalidNetwork {
    pub value: String,
    pub reason: String,
}

/// An IPv4 or IPv6 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn mask_u128(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

impl FromStr for IpNetwork {
    type Err = InvalidNetwork;

    /// Accepts `10.0.0.0/8`, `fd00::/8`, or a bare address (full-length prefix).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| InvalidNetwork {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr: IpAddr = addr.trim().parse().map_err(|_| invalid("bad address"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| invalid("bad prefix length"))?,
            None => max,
        };
        if prefix > max {
            return Err(invalid("prefix length out of range"));
        }

        Ok(Self { addr, prefix })
    }
}

/// Allow-list of reverse proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Vec<IpNetwork>);

impl TrustedProxies {
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list, e.g. `10.0.0.0/8,192.168.1.1`.
    pub fn parse(list: &str) -> Result<Self, InvalidNetwork> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(IpNetwork::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(ip))
    }
}

/// Derive the rate-limit identity of a request.
///
/// With an untrusted peer the peer address is the identity. With a trusted
/// peer, the left-most `X-Forwarded-For` entry wins, then `X-Real-IP`; a
/// header value that is not an IP address is ignored.
pub fn client_identity(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    trusted: &TrustedProxies,
) -> String {
    let peer = peer.to_canonical();
    if !trusted.contains(peer) {
        return peer.to_string();
    }

    let leftmost = forwarded_for.and_then(|xff| xff.split(',').next());
    [leftmost, real_ip]
        .into_iter()
        .flatten()
        .find_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
        .unwrap_or(peer)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn bare_addresses_get_full_prefix() {
        let v4: IpNetwork = "192.168.1.1".parse().unwrap();
        let v6: IpNetwork = "::1".parse().unwrap();
        assert_eq!(v4.prefix(), 32);
        assert_eq!(v6.prefix(), 128);
        assert!(v4.contains(ip("192.168.1.1")));
        assert!(!v4.contains(ip("192.168.1.2")));
    }

    #[test]
    fn cidr_membership() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains(ip("10.200.3.4")));
        assert!(!net.contains(ip("11.0.0.1")));
        assert!(!net.contains(ip("::1")));

        let all: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(ip("203.0.113.9")));
    }

    #[test]
    fn v4_mapped_v6_peer_matches_v4_network() {
        let proxies = TrustedProxies::parse("127.0.0.1").unwrap();
        assert!(proxies.contains(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(TrustedProxies::parse("10.0.0.0/33").is_err());
        assert!(TrustedProxies::parse("not-an-ip").is_err());
        assert!(TrustedProxies::parse("10.0.0.0/x").is_err());
        assert!(TrustedProxies::parse(" , ").unwrap().is_empty());
    }

    #[test]
    fn untrusted_peer_headers_are_ignored() {
        let trusted = TrustedProxies::parse("10.0.0.0/8").unwrap();
        let id = client_identity(ip("203.0.113.7"), Some("1.2.3.4"), Some("5.6.7.8"), &trusted);
        assert_eq!(id, "203.0.113.7");
    }

    #[test]
    fn trusted_peer_uses_leftmost_forwarded_for() {
        let trusted = TrustedProxies::parse("10.0.0.0/8").unwrap();
        let id = client_identity(
            ip("10.0.0.2"),
            Some(" 198.51.100.4 , 10.0.0.9"),
            Some("5.6.7.8"),
            &trusted,
        );
        assert_eq!(id, "198.51.100.4");
    }

    #[test]
    fn trusted_peer_falls_back_to_real_ip_then_peer() {
        let trusted = TrustedProxies::parse("10.0.0.0/8").unwrap();
        assert_eq!(
            client_identity(ip("10.0.0.2"), None, Some("198.51.100.5"), &trusted),
            "198.51.100.5"
        );
        assert_eq!(
            client_identity(ip("10.0.0.2"), Some("garbage"), None, &trusted),
            "10.0.0.2"
        );
    }
}
