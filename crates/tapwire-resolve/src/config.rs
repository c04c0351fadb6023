//! Resolver chain configuration, stored as JSON.
//!
//! ```json
//! {
//!   "backends": ["caching-native", "dns"],
//!   "remappings": { "api.example.com": "127.0.0.1" },
//!   "positive_ttl_secs": 30,
//!   "negative_ttl_secs": -1,
//!   "dns": { "max_attempts": 5, "ipv4_first": true }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chained::ChainedHostResolver;
use crate::dns::{DnsLookupPolicy, LibraryDnsLookup};
use crate::error::{ResolverError, Result};
use crate::native::{CachingNativeLookup, NativeLookup};
use crate::remap::RemappingResolver;
use crate::resolver::{AdvancedHostResolver, CacheTimeout, RemappingTable};

/// A resolver backend that can be named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Platform lookup; cache controls are ignored.
    Native,
    /// Platform lookup behind an in-process cache.
    CachingNative,
    /// hickory DNS client using the system's DNS servers.
    Dns,
}

/// Resolver chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Backends tried in order.
    pub backends: Vec<BackendKind>,
    /// Remappings in application order.
    pub remappings: RemappingTable,
    /// Seconds to cache successful lookups; negative caches forever.
    pub positive_ttl_secs: i64,
    /// Seconds to cache failed lookups; negative caches forever.
    pub negative_ttl_secs: i64,
    pub dns: DnsLookupPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::Native],
            remappings: RemappingTable::new(),
            positive_ttl_secs: 30,
            negative_ttl_secs: 10,
            dns: DnsLookupPolicy::default(),
        }
    }
}

impl ResolverConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ResolverError::ReadConfig {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    /// Serializes as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects remappings with an empty side.
    pub fn validate(&self) -> Result<()> {
        for (original, replacement) in &self.remappings {
            if original.trim().is_empty() || replacement.trim().is_empty() {
                return Err(ResolverError::InvalidRemapping {
                    original: original.clone(),
                    replacement: replacement.clone(),
                });
            }
        }
        Ok(())
    }

    /// Builds the chain and applies timeouts and remappings through it.
    pub fn build(&self) -> Result<ChainedHostResolver> {
        self.validate()?;

        let resolvers = self
            .backends
            .iter()
            .map(|kind| self.backend(*kind))
            .collect::<Result<Vec<_>>>()?;
        let chain = ChainedHostResolver::new(resolvers);

        chain.set_positive_dns_cache_timeout(CacheTimeout::from_secs(self.positive_ttl_secs));
        chain.set_negative_dns_cache_timeout(CacheTimeout::from_secs(self.negative_ttl_secs));
        if !self.remappings.is_empty() {
            chain.remap_hosts(self.remappings.clone());
        }

        tracing::info!(
            "Built resolver chain {:?} with {} remappings",
            self.backends,
            self.remappings.len()
        );
        Ok(chain)
    }

    fn backend(&self, kind: BackendKind) -> Result<Arc<dyn AdvancedHostResolver>> {
        let resolver: Arc<dyn AdvancedHostResolver> = match kind {
            BackendKind::Native => Arc::new(RemappingResolver::new(NativeLookup)),
            BackendKind::CachingNative => {
                Arc::new(RemappingResolver::new(CachingNativeLookup::new()))
            }
            BackendKind::Dns => Arc::new(RemappingResolver::new(
                LibraryDnsLookup::from_system_conf(self.dns)?,
            )),
        };
        Ok(resolver)
    }
}
