//! Resolvers backed by the platform's standard name lookup.

use std::net::{IpAddr, ToSocketAddrs};

use crate::cache::DnsCache;
use crate::remap::{RemappingResolver, ResolverBackend};
use crate::resolver::{ip_literal, CacheTimeout};

/// Platform lookup with remapping; cache controls are no-ops.
pub type NativeHostResolver = RemappingResolver<NativeLookup>;

/// Platform lookup with remapping and an in-process cache.
pub type CachingNativeHostResolver = RemappingResolver<CachingNativeLookup>;

/// Looks up `host` with the system resolver, keeping its order and dropping duplicates.
pub(crate) fn platform_lookup(host: &str) -> Vec<IpAddr> {
    if let Some(ip) = ip_literal(host) {
        return vec![ip];
    }
    if host.is_empty() {
        return Vec::new();
    }

    match (host, 0u16).to_socket_addrs() {
        Ok(addrs) => {
            let mut resolved: Vec<IpAddr> = Vec::new();
            for addr in addrs {
                if !resolved.contains(&addr.ip()) {
                    resolved.push(addr.ip());
                }
            }
            resolved
        }
        Err(e) => {
            tracing::debug!("Platform lookup of {} failed: {}", host, e);
            Vec::new()
        }
    }
}

/// The platform resolver, whose cache cannot be controlled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLookup;

impl ResolverBackend for NativeLookup {
    fn resolve_remapped(&self, host: &str) -> Vec<IpAddr> {
        platform_lookup(host)
    }

    fn clear_dns_cache(&self) {
        tracing::debug!("Platform resolver does not support clearing its DNS cache");
    }

    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout) {
        tracing::debug!(
            "Platform resolver does not support a positive DNS cache timeout ({:?})",
            timeout
        );
    }

    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout) {
        tracing::debug!(
            "Platform resolver does not support a negative DNS cache timeout ({:?})",
            timeout
        );
    }
}

/// The platform resolver fronted by a [`DnsCache`] this process controls.
#[derive(Debug, Default)]
pub struct CachingNativeLookup {
    cache: DnsCache,
}

impl CachingNativeLookup {
    /// Uses a cache with the default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `cache`, e.g. one with a custom bound.
    pub fn with_cache(cache: DnsCache) -> Self {
        Self { cache }
    }

    /// Returns the cache in front of the platform resolver.
    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }
}

impl ResolverBackend for CachingNativeLookup {
    fn resolve_remapped(&self, host: &str) -> Vec<IpAddr> {
        if let Some(ip) = ip_literal(host) {
            return vec![ip];
        }
        if let Some(cached) = self.cache.get(host) {
            return cached;
        }

        let resolved = platform_lookup(host);
        self.cache.insert(host, resolved.clone());
        resolved
    }

    fn clear_dns_cache(&self) {
        self.cache.clear();
    }

    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.cache.set_positive_ttl(timeout);
    }

    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout) {
        self.cache.set_negative_ttl(timeout);
    }
}
