//! DNS-pinned redirect target validation
//!
//! Before this server trusts a redirect/callback host it resolves the
//! hostname through a resolver pinned to a fixed public DNS service,
//! independent of the host machine's resolver configuration, and rejects
//! targets that resolve to non-public addresses. This closes the SSRF and
//! open-redirect classes of attack, including DNS-rebinding names that
//! resolve to internal infrastructure and IPv4-mapped IPv6 literals used
//! to bypass naive filters.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

use crate::{Error, Result};

/// Resolver abstraction so tests can substitute a fake resolver instead of
/// depending on network DNS.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    /// Resolve a hostname to its addresses.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Production resolver pinned to Google Public DNS (8.8.8.8 / 8.8.4.4).
pub struct PinnedResolver {
    inner: TokioAsyncResolver,
    timeout: Duration,
}

impl PinnedResolver {
    /// Create the pinned resolver with a 5 second lookup timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default()),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PinnedResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedirectResolver for PinnedResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = tokio::time::timeout(self.timeout, self.inner.lookup_ip(host))
            .await
            .map_err(|_| Error::RedirectBlocked(format!("DNS resolution timed out for {host}")))?
            .map_err(|e| Error::RedirectBlocked(format!("DNS resolution failed for {host}: {e}")))?;

        Ok(lookup.iter().collect())
    }
}

/// Fixed-answer resolver for tests.
pub struct StaticResolver {
    answers: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Create a resolver returning the given answers; unknown hosts fail.
    #[must_use]
    pub fn new(answers: HashMap<String, Vec<IpAddr>>) -> Self {
        Self { answers }
    }
}

#[async_trait]
impl RedirectResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.answers
            .get(host)
            .cloned()
            .ok_or_else(|| Error::RedirectBlocked(format!("DNS resolution failed for {host}")))
    }
}

/// Validate a redirect target URL.
///
/// Loopback literals (`127.0.0.1`, `[::1]`, `localhost`) are permitted:
/// native applications legitimately listen there (RFC 8252). Any other
/// hostname is resolved through the pinned resolver and every returned
/// address must be publicly routable.
pub async fn validate_redirect_target(
    resolver: &dyn RedirectResolver,
    url_str: &str,
) -> Result<()> {
    let parsed = url::Url::parse(url_str)
        .map_err(|e| Error::RedirectBlocked(format!("Invalid redirect URI: {e}")))?;

    let Some(host) = parsed.host_str() else {
        return Err(Error::RedirectBlocked("Redirect URI has no host".to_string()));
    };

    // Bracket-enclosed IPv6 literals parse as hosts like `[::1]`
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(addr) = bare.parse::<IpAddr>() {
        if is_loopback(addr) {
            return Ok(());
        }
        return check_address(addr, host);
    }

    if bare.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }

    let addrs = resolver.resolve(bare).await?;
    if addrs.is_empty() {
        return Err(Error::RedirectBlocked(format!(
            "Host {host} resolved to no addresses"
        )));
    }

    for addr in addrs {
        check_address(addr, host)?;
    }

    debug!(host = %host, "Redirect target passed DNS-pinned validation");
    Ok(())
}

fn is_loopback(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn check_address(addr: IpAddr, host: &str) -> Result<()> {
    if is_private_or_reserved(addr) {
        return Err(Error::RedirectBlocked(format!(
            "Host {host} resolves to non-public address {addr}"
        )));
    }
    Ok(())
}

/// Check whether an address is private/loopback/link-local and must not be
/// trusted as a redirect target.
fn is_private_or_reserved(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()          // 127.0.0.0/8
    || addr.is_private()        // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
    || addr.is_link_local()     // 169.254.0.0/16
    || addr.is_broadcast()      // 255.255.255.255
    || addr.is_unspecified()    // 0.0.0.0
    || is_shared_address(addr)  // 100.64.0.0/10 (CGN)
    || is_documentation(addr)   // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
}

/// Check 100.64.0.0/10 (Carrier-Grade NAT / shared address space).
fn is_shared_address(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Check documentation ranges (TEST-NET-1/2/3).
fn is_documentation(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Check if an IPv6 address is private, link-local, or an IPv4-mapped
/// address pointing into a private range.
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }

    let segments = addr.segments();

    // Link-local (fe80::/10)
    if segments[0] & 0xFFC0 == 0xFE80 {
        return true;
    }

    // Unique Local Address (fc00::/7)
    if segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }

    // IPv4-mapped IPv6 (`::ffff:x.x.x.x`) -- the key bypass vector
    if let Some(ipv4) = extract_ipv4_mapped(&addr) {
        return is_private_ipv4(ipv4);
    }

    // IPv4-compatible IPv6 (deprecated but still parseable: `::x.x.x.x`)
    if let Some(ipv4) = extract_ipv4_compatible(&addr) {
        return is_private_ipv4(ipv4);
    }

    // 6to4 (2002::/16) can embed a private IPv4
    if segments[0] == 0x2002 {
        let embedded = Ipv4Addr::new(
            (segments[1] >> 8) as u8,
            segments[1] as u8,
            (segments[2] >> 8) as u8,
            segments[2] as u8,
        );
        return is_private_ipv4(embedded);
    }

    // Teredo (2001:0000::/32) can embed a private IPv4
    if segments[0] == 0x2001 && segments[1] == 0x0000 {
        // Teredo client IPv4 is obfuscated (XOR with 0xFFFF)
        let client_ipv4 = Ipv4Addr::new(
            (segments[6] >> 8) as u8 ^ 0xFF,
            segments[6] as u8 ^ 0xFF,
            (segments[7] >> 8) as u8 ^ 0xFF,
            segments[7] as u8 ^ 0xFF,
        );
        return is_private_ipv4(client_ipv4);
    }

    false
}

/// Extract the IPv4 address from an IPv4-mapped IPv6 (`::ffff:x.x.x.x`).
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn extract_ipv4_mapped(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = addr.segments();
    if segments[..5] == [0, 0, 0, 0, 0] && segments[5] == 0xFFFF {
        Some(Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        ))
    } else {
        None
    }
}

/// Extract the IPv4 address from an IPv4-compatible IPv6 (`::x.x.x.x`,
/// deprecated).
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn extract_ipv4_compatible(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = addr.segments();
    // All-zero prefix with non-zero tail (excluding :: and ::1)
    if segments[..6] == [0, 0, 0, 0, 0, 0] && (segments[6] != 0 || segments[7] > 1) {
        Some(Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(host: &str, addrs: Vec<IpAddr>) -> StaticResolver {
        let mut answers = HashMap::new();
        answers.insert(host.to_string(), addrs);
        StaticResolver::new(answers)
    }

    // ── address classification ────────────────────────────────────────

    #[test]
    fn private_ipv4_ranges_blocked() {
        assert!(is_private_ipv4(Ipv4Addr::LOCALHOST));
        assert!(is_private_ipv4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(169, 254, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(100, 64, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(is_private_ipv4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn public_ipv4_passes() {
        assert!(!is_private_ipv4(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_private_ipv4(Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn ipv4_mapped_ipv6_blocked() {
        let addr: Ipv6Addr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "::ffff:10.0.0.1".parse().unwrap();
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "::ffff:8.8.8.8".parse().unwrap();
        assert!(!is_private_ipv6(addr));
    }

    #[test]
    fn ipv4_compatible_ipv6_blocked() {
        let addr: Ipv6Addr = "::10.0.0.1".parse().unwrap();
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "::192.168.1.1".parse().unwrap();
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "::8.8.8.8".parse().unwrap();
        assert!(!is_private_ipv6(addr));
        // :: and ::1 are not IPv4-compatible embeds
        assert!(is_private_ipv6(Ipv6Addr::UNSPECIFIED));
        assert!(is_private_ipv6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn teredo_embedding_private_blocked() {
        // Teredo client IPv4 rides XORed with 0xFFFF in the last segments
        let addr: Ipv6Addr = "2001:0:0:0:0:0:f5ff:fffe".parse().unwrap(); // 10.0.0.1
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "2001:0:0:0:0:0:f7f7:f7f7".parse().unwrap(); // 8.8.8.8
        assert!(!is_private_ipv6(addr));
    }

    #[test]
    fn sixto4_embedding_private_blocked() {
        let addr: Ipv6Addr = "2002:0a00:0001::".parse().unwrap();
        assert!(is_private_ipv6(addr));
        let addr: Ipv6Addr = "2002:0808:0808::".parse().unwrap();
        assert!(!is_private_ipv6(addr));
    }

    // ── validate_redirect_target ──────────────────────────────────────

    #[tokio::test]
    async fn loopback_literals_allowed() {
        let resolver = StaticResolver::new(HashMap::new());
        assert!(validate_redirect_target(&resolver, "http://127.0.0.1:8080/cb")
            .await
            .is_ok());
        assert!(validate_redirect_target(&resolver, "http://[::1]:8080/cb")
            .await
            .is_ok());
        assert!(validate_redirect_target(&resolver, "http://localhost:8080/cb")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn private_ip_literal_blocked() {
        let resolver = StaticResolver::new(HashMap::new());
        assert!(validate_redirect_target(&resolver, "http://10.0.0.1/cb")
            .await
            .is_err());
        assert!(validate_redirect_target(&resolver, "http://[::ffff:10.0.0.1]/cb")
            .await
            .is_err());
        assert!(validate_redirect_target(&resolver, "http://[::10.0.0.1]/cb")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn hostname_resolving_ipv4_compatible_private_blocked() {
        let resolver = resolver_with(
            "sneaky.example.com",
            vec![IpAddr::V6("::a00:1".parse().unwrap())],
        );
        assert!(
            validate_redirect_target(&resolver, "https://sneaky.example.com/cb")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn hostname_resolving_private_blocked() {
        let resolver = resolver_with(
            "evil.example.com",
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))],
        );
        assert!(
            validate_redirect_target(&resolver, "https://evil.example.com/cb")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn hostname_resolving_mixed_blocked() {
        // One public and one private answer: rebinding attempt, reject.
        let resolver = resolver_with(
            "flappy.example.com",
            vec![
                IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
                IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            ],
        );
        assert!(
            validate_redirect_target(&resolver, "https://flappy.example.com/cb")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn hostname_resolving_public_allowed() {
        let resolver = resolver_with(
            "app.example.com",
            vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))],
        );
        assert!(
            validate_redirect_target(&resolver, "https://app.example.com/cb")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn unknown_host_blocked() {
        let resolver = StaticResolver::new(HashMap::new());
        assert!(
            validate_redirect_target(&resolver, "https://unknown.example.com/cb")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn invalid_url_blocked() {
        let resolver = StaticResolver::new(HashMap::new());
        assert!(validate_redirect_target(&resolver, "not a url").await.is_err());
    }
}
