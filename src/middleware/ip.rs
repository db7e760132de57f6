//! Client origin extraction: who is on the other end, and over which scheme.
//!
//! # Security: Forwarding Headers
//!
//! `X-Forwarded-For`, `X-Real-IP` and `X-Forwarded-Proto` are set by whoever
//! sends the request, so they are only honoured when the TCP peer lies inside
//! one of the `TRUSTED_PROXIES` ranges. Everyone else is identified by the
//! peer address and assumed to speak plain HTTP.
//!
//! Without this, a client could rotate spoofed addresses to escape the
//! anonymous quota, or claim `https` to make a token bound to an `https://`
//! URL verify over plain HTTP.
//!
//! ```text
//! peer trusted?  ──no──▶ ip = peer, scheme = http
//!      │
//!     yes
//!      ▼
//! X-Forwarded-For (first) ▶ X-Real-IP ▶ peer
//! X-Forwarded-Proto == "https" ▶ scheme = https
//! ```

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback when the peer address is not known (e.g. in-process tests).
pub const UNKNOWN_IP: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is a single-host range. Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Networks whose forwarding headers are believed.
///
/// Empty means no peer is trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Client Origin
// =============================================================================

/// Where a request came from, as far as the gateway can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin {
    /// Client address without port, or [`UNKNOWN_IP`].
    pub ip: String,
    /// Whether the client reached the edge over TLS.
    pub is_tls: bool,
}

/// Resolve the client origin of a request.
///
/// The TCP peer is read from the `ConnectInfo<SocketAddr>` extension that
/// `into_make_service_with_connect_info` installs.
pub fn client_origin<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> ClientOrigin {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(peer) = peer else {
        return ClientOrigin {
            ip: UNKNOWN_IP.to_string(),
            is_tls: false,
        };
    };

    if !trusted.is_trusted(&peer) {
        return ClientOrigin {
            ip: peer.to_string(),
            is_tls: false,
        };
    }

    let forwarded_ip = forwarded_client_ip(req);
    if forwarded_ip.is_none() {
        debug!(peer = %peer, "Trusted proxy sent no client address header");
    }

    ClientOrigin {
        ip: forwarded_ip.unwrap_or_else(|| peer.to_string()),
        is_tls: forwarded_https(req),
    }
}

/// First parseable address in `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_client_ip<B>(req: &Request<B>) -> Option<String> {
    let headers = req.headers();

    if let Some(value) = headers.get(X_FORWARDED_FOR)
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next()
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return Some(ip.to_string());
    }

    if let Some(value) = headers.get(X_REAL_IP)
        && let Ok(value) = value.to_str()
        && let Ok(ip) = value.trim().parse::<IpAddr>()
    {
        return Some(ip.to_string());
    }

    None
}

fn forwarded_https<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_from(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        Request::builder().extension(ConnectInfo(addr))
    }

    fn trusted() -> TrustedProxyConfig {
        TrustedProxyConfig::new(&["10.0.0.0/8".to_string()])
    }

    #[test]
    fn test_cidr_parse_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&"10.255.1.2".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_ipv6() {
        let cidr = CidrRange::parse("::1/128").unwrap();
        assert!(cidr.contains(&"::1".parse().unwrap()));
        assert!(!cidr.contains(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_single_ip() {
        let cidr = CidrRange::parse("192.168.1.1").unwrap();
        assert!(cidr.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/x").is_none());
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&"203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_config_skips_invalid() {
        let config = TrustedProxyConfig::new(&["bogus".to_string(), "10.0.0.0/8".to_string()]);
        assert!(config.is_enabled());
        assert!(config.is_trusted(&"10.1.1.1".parse().unwrap()));
    }

    #[test]
    fn test_empty_config_trusts_nobody() {
        let config = TrustedProxyConfig::default();
        assert!(!config.is_enabled());
        assert!(!config.is_trusted(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let req = request_from("203.0.113.7:50000")
            .header("x-forwarded-for", "198.51.100.1")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        let origin = client_origin(&req, &trusted());
        assert_eq!(origin.ip, "203.0.113.7");
        assert!(!origin.is_tls);
    }

    #[test]
    fn test_trusted_peer_uses_first_forwarded_ip() {
        let req = request_from("10.0.0.5:50000")
            .header("x-forwarded-for", " 198.51.100.1 , 10.0.0.2")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();

        let origin = client_origin(&req, &trusted());
        assert_eq!(origin.ip, "198.51.100.1");
        assert!(origin.is_tls);
    }

    #[test]
    fn test_trusted_peer_falls_back_to_real_ip() {
        let req = request_from("10.0.0.5:50000")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();

        let origin = client_origin(&req, &trusted());
        assert_eq!(origin.ip, "198.51.100.2");
        assert!(!origin.is_tls);
    }

    #[test]
    fn test_trusted_peer_garbage_header_falls_back_to_peer() {
        let req = request_from("10.0.0.5:50000")
            .header("x-forwarded-for", "not-an-ip")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_origin(&req, &trusted()).ip, "10.0.0.5");
    }

    #[test]
    fn test_missing_connect_info_is_unknown() {
        let req = Request::builder()
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::empty())
            .unwrap();

        let origin = client_origin(&req, &trusted());
        assert_eq!(origin.ip, UNKNOWN_IP);
        assert!(!origin.is_tls);
    }

    #[test]
    fn test_peer_ip_excludes_port() {
        let req = request_from("[2001:db8::1]:443")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            client_origin(&req, &TrustedProxyConfig::default()).ip,
            "2001:db8::1"
        );
    }
}
