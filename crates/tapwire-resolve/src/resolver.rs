//! Core resolver capabilities.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

/// Ordered table of original hostname to replacement hostname.
pub type RemappingTable = IndexMap<String, String>;

/// Hostname to address resolution.
pub trait HostResolver: Send + Sync {
    /// Resolves `host` in the order the underlying lookup returns.
    ///
    /// Returns an empty list when the host cannot be resolved.
    fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// A resolver with a remapping table and DNS cache controls.
pub trait AdvancedHostResolver: HostResolver {
    /// Replaces the whole table. Application order is the map's order.
    fn remap_hosts(&self, remappings: RemappingTable);

    /// Adds or replaces one remapping, moving it to the end of the order.
    fn remap_host(&self, original: &str, replacement: &str);

    fn remove_host_remapping(&self, original: &str);

    fn clear_host_remappings(&self);

    /// Current remapping snapshot.
    fn host_remappings(&self) -> Arc<RemappingTable>;

    /// Every original hostname currently mapped to `remapped`, in application order.
    fn original_hostnames(&self, remapped: &str) -> Vec<String>;

    fn clear_dns_cache(&self);

    /// How long successful lookups stay cached.
    fn set_positive_dns_cache_timeout(&self, timeout: CacheTimeout);

    /// How long failed lookups stay cached.
    fn set_negative_dns_cache_timeout(&self, timeout: CacheTimeout);
}

impl<R: HostResolver + ?Sized> HostResolver for Arc<R> {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        (**self).resolve(host)
    }
}

/// Lifetime of a DNS cache entry, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTimeout {
    /// Entries never expire.
    Forever,
    /// Entries expire after this many seconds; zero disables caching.
    Seconds(u64),
}

impl CacheTimeout {
    pub const DISABLED: Self = Self::Seconds(0);

    /// Negative values mean forever.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => Self::Seconds(secs),
            Err(_) => Self::Forever,
        }
    }

    /// Rounds to the nearest whole second.
    pub fn from_duration(duration: Duration) -> Self {
        let round_up = duration.subsec_millis() >= 500;
        Self::Seconds(duration.as_secs() + u64::from(round_up))
    }

    /// Whether nothing should be cached.
    pub fn is_disabled(self) -> bool {
        self == Self::DISABLED
    }

    /// True when an entry of the given age is still fresh.
    pub(crate) fn is_fresh(self, age: Duration) -> bool {
        match self {
            Self::Forever => true,
            Self::Seconds(secs) => age < Duration::from_secs(secs),
        }
    }
}

/// Parses `host` as an IP literal, accepting bracketed IPv6.
pub(crate) fn ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}
