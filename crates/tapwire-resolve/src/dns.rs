//! Resolver backed by a DNS client library with its own cache.
//!
//! Lookups ask for IPv4 records first and fall back to IPv6 only when no
//! IPv4 address exists. A lookup the backend reports as transient is
//! retried a bounded number of times before it counts as a miss.

use std::fmt;
use std::net::IpAddr;

use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::Resolver;
use serde::{Deserialize, Serialize};

use crate::cache::DnsCache;
use crate::error::{ResolverError, Result};
use crate::remap::{RemappingResolver, ResolverBackend};
use crate::resolver::{ip_literal, CacheTimeout};

/// Library DNS lookup with remapping.
pub type DnsHostResolver<D = HickoryBackend> = RemappingResolver<LibraryDnsLookup<D>>;

/// Default number of attempts per record family.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Address record family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFamily {
    Ipv4,
    Ipv6,
}

/// Result of a single lookup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(Vec<IpAddr>),
    NotFound,
    /// A transient failure; the lookup may succeed if repeated.
    TryAgain,
}

/// A DNS client able to answer one record family per call.
pub trait DnsBackend: Send + Sync {
    fn lookup(&self, host: &str, family: RecordFamily) -> LookupOutcome;
}

/// Retry and family-order policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsLookupPolicy {
    /// Attempts per record family while the backend says "try again".
    pub max_attempts: u32,
    /// Query IPv4 before IPv6.
    pub ipv4_first: bool,
}

impl Default for DnsLookupPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            ipv4_first: true,
        }
    }
}

impl DnsLookupPolicy {
    fn family_order(&self) -> [RecordFamily; 2] {
        if self.ipv4_first {
            [RecordFamily::Ipv4, RecordFamily::Ipv6]
        } else {
            [RecordFamily::Ipv6, RecordFamily::Ipv4]
        }
    }
}

/// Cached, retrying lookups through a [`DnsBackend`].
#[derive(Debug)]
pub struct LibraryDnsLookup<D = HickoryBackend> {
    backend: D,
    policy: DnsLookupPolicy,
    cache: DnsCache,
}

impl LibraryDnsLookup<HickoryBackend> {
    /// Uses the system's DNS configuration.
    pub fn from_system_conf(policy: DnsLookupPolicy) -> Result<Self> {
        Ok(Self::with_policy(HickoryBackend::from_system_conf()?, policy))
    }
}

impl<D: DnsBackend> LibraryDnsLookup<D> {
    /// Wraps `backend` with the default lookup policy.
    pub fn new(backend: D) -> Self {
        Self::with_policy(backend, DnsLookupPolicy::default())
    }

    /// Wraps `backend` with an explicit retry and family policy.
    pub fn with_policy(backend: D, policy: DnsLookupPolicy) -> Self {
        Self {
            backend,
            policy,
            cache: DnsCache::default(),
        }
    }

    /// Returns the DNS backend.
    pub fn backend(&self) -> &D {
        &self.backend
    }

    /// Returns the lookup policy.
    pub fn policy(&self) -> DnsLookupPolicy {
        self.policy
    }

    /// Returns the lookup cache.
    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    fn lookup_family(&self, host: &str, family: RecordFamily) -> Vec<IpAddr> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.backend.lookup(host, family) {
                LookupOutcome::Found(addresses) => return addresses,
                LookupOutcome::NotFound => return Vec::new(),
                LookupOutcome::TryAgain => {
                    tracing::debug!(
                        "Transient failure resolving {} ({:?}), attempt {}/{}",
                        host,
                        family,
                        attempt,
                        attempts
                    );
                }
            }
        }
        tracing::debug!("Giving up on {} ({:?}) after {} attempts", host, family, attempts);
        Vec::new()
    }
}

impl<D: DnsBackend> ResolverBackend for LibraryDnsLookup<D> {
    fn resolve_remapped(&self, host: &str) -> Vec<IpAddr> {
        if let Some(ip) = ip_literal(host) {
            return vec![ip];
        }
        if host.is_empty() {
            return Vec::new();
        }
        if let Some(cached) = self.cache.get(host) {
            return cached;
        }

        let mut resolved = Vec::new();
        for family in self.policy.family_order() {
            resolved = self.lookup_family(host, family);
            if !resolved.is_empty() {
                break;
            }
        }

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

// ============================================================================
// hickory
// ============================================================================

/// [`DnsBackend`] over hickory's blocking resolver.
///
/// The blocking resolver drives a private tokio runtime. Each query runs on
/// a scoped thread, so lookups may be issued from inside an async runtime.
/// Dropping the backend shuts that runtime down and must happen outside
/// async contexts.
pub struct HickoryBackend {
    resolver: Resolver,
}

impl HickoryBackend {
    /// Reads the system's resolver configuration.
    ///
    /// Hickory's own cache is disabled; [`LibraryDnsLookup`] caches instead.
    pub fn from_system_conf() -> Result<Self> {
        let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| ResolverError::Backend(e.to_string()))?;
        opts.cache_size = 0;
        let resolver =
            Resolver::new(config, opts).map_err(|e| ResolverError::Backend(e.to_string()))?;
        Ok(Self { resolver })
    }

    /// Wraps an already configured resolver.
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    fn query(
        &self,
        host: &str,
        family: RecordFamily,
    ) -> std::result::Result<Vec<IpAddr>, ResolveError> {
        match family {
            RecordFamily::Ipv4 => self
                .resolver
                .ipv4_lookup(host)
                .map(|lookup| lookup.iter().map(|a| IpAddr::V4(a.0)).collect()),
            RecordFamily::Ipv6 => self
                .resolver
                .ipv6_lookup(host)
                .map(|lookup| lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect()),
        }
    }
}

impl fmt::Debug for HickoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryBackend").finish_non_exhaustive()
    }
}

impl DnsBackend for HickoryBackend {
    fn lookup(&self, host: &str, family: RecordFamily) -> LookupOutcome {
        // Blocking on hickory's runtime panics on a thread that already runs one.
        let result = std::thread::scope(|scope| scope.spawn(|| self.query(host, family)).join());

        match result {
            Ok(Ok(addresses)) if addresses.is_empty() => LookupOutcome::NotFound,
            Ok(Ok(addresses)) => LookupOutcome::Found(addresses),
            Ok(Err(e)) => outcome_for_error(&e),
            Err(_) => {
                tracing::warn!("DNS lookup thread for {} panicked", host);
                LookupOutcome::NotFound
            }
        }
    }
}

fn outcome_for_error(error: &ResolveError) -> LookupOutcome {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code == ResponseCode::ServFail =>
        {
            LookupOutcome::TryAgain
        }
        ResolveErrorKind::NoRecordsFound { .. } => LookupOutcome::NotFound,
        ResolveErrorKind::Timeout
        | ResolveErrorKind::NoConnections
        | ResolveErrorKind::Io(_)
        | ResolveErrorKind::Proto(_) => LookupOutcome::TryAgain,
        _ => {
            tracing::debug!("Treating DNS error as a miss: {}", error);
            LookupOutcome::NotFound
        }
    }
}
