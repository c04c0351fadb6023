//! In-process DNS cache with separate positive and negative lifetimes.
//!
//! Entries remember when they were stored. Freshness is judged against
//! the timeout in force when the entry is read, so a timeout change
//! applies to existing entries immediately.
//!
//! The cache holds at most `max_entries` hosts. Inserting into a full cache
//! first drops expired entries, then the oldest one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use parking_lot::RwLock;

use crate::resolver::CacheTimeout;

/// Default lifetime of a successful lookup.
pub const DEFAULT_POSITIVE_TTL: CacheTimeout = CacheTimeout::Seconds(30);

/// Default lifetime of a failed lookup.
pub const DEFAULT_NEGATIVE_TTL: CacheTimeout = CacheTimeout::Seconds(10);

/// Default bound on cached hosts.
pub const DEFAULT_MAX_ENTRIES: usize = 4_096;

#[derive(Debug, Clone)]
struct CacheEntry {
    addresses: Vec<IpAddr>,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, positive: CacheTimeout, negative: CacheTimeout) -> bool {
        let ttl = if self.addresses.is_empty() {
            negative
        } else {
            positive
        };
        ttl.is_fresh(self.stored_at.elapsed())
    }
}

/// Cached lookup results keyed by lowercase hostname.
#[derive(Debug)]
pub struct DnsCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    positive_ttl: RwLock<CacheTimeout>,
    negative_ttl: RwLock<CacheTimeout>,
    max_entries: usize,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }
}

impl DnsCache {
    /// Creates an empty cache holding up to [`DEFAULT_MAX_ENTRIES`] hosts.
    pub fn new(positive_ttl: CacheTimeout, negative_ttl: CacheTimeout) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            positive_ttl: RwLock::new(positive_ttl),
            negative_ttl: RwLock::new(negative_ttl),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Bounds the number of cached hosts. Zero is treated as one.
    ///
    /// ```
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use tapwire_resolve::{CacheTimeout, DnsCache};
    ///
    /// let cache = DnsCache::new(CacheTimeout::Forever, CacheTimeout::Forever).with_max_entries(2);
    /// for host in ["a.test", "b.test", "c.test"] {
    ///     cache.insert(host, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    /// }
    /// assert_eq!(cache.len(), 2);
    /// ```
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Returns the bound on cached hosts.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the cached answer for `host`, if still fresh.
    ///
    /// `Some(vec![])` is a cached failure.
    pub fn get(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entries = self.entries.read();
        let entry = entries.get(&host.to_ascii_lowercase())?;
        let ttl = self.ttl_for(&entry.addresses);
        ttl.is_fresh(entry.stored_at.elapsed())
            .then(|| entry.addresses.clone())
    }

    /// Records a lookup result. Nothing is stored when its timeout is zero.
    pub fn insert(&self, host: &str, addresses: Vec<IpAddr>) {
        self.store(host, addresses, Instant::now());
    }

    fn store(&self, host: &str, addresses: Vec<IpAddr>, stored_at: Instant) {
        if self.ttl_for(&addresses).is_disabled() {
            return;
        }
        let key = host.to_ascii_lowercase();
        let (positive, negative) = (self.positive_ttl(), self.negative_ttl());

        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_fresh(positive, negative));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(host, _)| host.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
            tracing::debug!(
                "DNS cache full, evicted {} entries",
                before - entries.len()
            );
        }
        entries.insert(
            key,
            CacheEntry {
                addresses,
                stored_at,
            },
        );
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        tracing::debug!("Clearing {} cached DNS entries", entries.len());
        entries.clear();
    }

    /// Drops entries that are no longer fresh.
    pub fn purge_expired(&self) {
        let positive = self.positive_ttl();
        let negative = self.negative_ttl();
        self.entries
            .write()
            .retain(|_, entry| entry.is_fresh(positive, negative));
    }

    /// Returns the number of cached hosts, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Checks if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the lifetime of successful lookups.
    pub fn positive_ttl(&self) -> CacheTimeout {
        *self.positive_ttl.read()
    }

    /// Returns the lifetime of failed lookups.
    pub fn negative_ttl(&self) -> CacheTimeout {
        *self.negative_ttl.read()
    }

    /// Sets the lifetime of successful lookups.
    pub fn set_positive_ttl(&self, timeout: CacheTimeout) {
        *self.positive_ttl.write() = timeout;
        tracing::debug!("Positive DNS cache timeout set to {:?}", timeout);
    }

    /// Sets the lifetime of failed lookups.
    pub fn set_negative_ttl(&self, timeout: CacheTimeout) {
        *self.negative_ttl.write() = timeout;
        tracing::debug!("Negative DNS cache timeout set to {:?}", timeout);
    }

    fn ttl_for(&self, addresses: &[IpAddr]) -> CacheTimeout {
        if addresses.is_empty() {
            self.negative_ttl()
        } else {
            self.positive_ttl()
        }
    }
}
