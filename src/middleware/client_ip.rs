// Client IP resolution and rate-limit key derivation
// X-Forwarded-For is only believed when the peer itself is a trusted proxy;
// otherwise the socket address wins. Resolution is total: it never fails and
// never returns nothing.

use ipnetwork::IpNetwork;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use crate::config::rate_limit::RateLimitStrategy;

/// Resolves the effective client IP behind trusted reverse proxies.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    trusted_proxies: Vec<IpNetwork>,
}

impl ClientIpResolver {
    pub fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies }
    }

    pub fn is_trusted_proxy(&self, addr: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|cidr| cidr.contains(addr))
    }

    /// Effective client IP for `remote_addr` and an optional
    /// `X-Forwarded-For` header value.
    pub fn resolve(&self, remote_addr: IpAddr, forwarded_for: Option<&str>) -> IpAddr {
        if !self.is_trusted_proxy(remote_addr) {
            return remote_addr;
        }

        // Leftmost entry is the origin client as recorded by the first proxy
        forwarded_for
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .and_then(|candidate| candidate.parse::<IpAddr>().ok())
            .unwrap_or(remote_addr)
    }
}

/// Derives deterministic keys for the login attempt policy. Usernames are
/// hashed so no PII lands in store keys.
#[derive(Debug, Clone)]
pub struct RateLimitKeyResolver {
    strategy: RateLimitStrategy,
}

impl RateLimitKeyResolver {
    pub fn new(strategy: RateLimitStrategy) -> Self {
        Self { strategy }
    }

    pub fn resolve(&self, client_ip: IpAddr, username: &str) -> String {
        match self.strategy {
            RateLimitStrategy::Ip => format!("ratelimit:ip:{}", client_ip),
            RateLimitStrategy::IpUser => {
                let digest = Sha256::digest(username.to_lowercase().as_bytes());
                format!("ratelimit:ipuser:{}:{:x}", client_ip, digest)
            },
        }
    }
}
