//! Tapwire Resolve - host resolution for the intercepting proxy.
//!
//! Every concrete resolver is a [`RemappingResolver`]: an ordered,
//! atomically replaced remapping table in front of a lookup backend.
//! Backends differ in how they look names up and whether their DNS cache
//! can be controlled:
//!
//! - [`NativeLookup`]: the platform resolver; cache controls are logged no-ops
//! - [`CachingNativeLookup`]: the platform resolver behind a [`DnsCache`]
//! - [`LibraryDnsLookup`]: a DNS client (hickory) with retry, IPv4-first
//!   ordering and its own cache
//!
//! [`ChainedHostResolver`] combines several resolvers. Configuration writes
//! reach every member atomically and resolution returns the first
//! non-empty answer.
//!
//! ```text
//! resolve(host) ──► ChainedHostResolver ──► [RemappingResolver ─► backend]...
//!                        │ first non-empty
//!                        ▼
//!                   Vec<IpAddr>
//! ```

mod cache;
mod chained;
mod config;
mod dns;
mod error;
mod native;
mod remap;
mod resolver;

pub use cache::{DnsCache, DEFAULT_MAX_ENTRIES, DEFAULT_NEGATIVE_TTL, DEFAULT_POSITIVE_TTL};
pub use chained::ChainedHostResolver;
pub use config::{BackendKind, ResolverConfig};
pub use dns::{
    DnsBackend, DnsHostResolver, DnsLookupPolicy, HickoryBackend, LibraryDnsLookup,
    LookupOutcome, RecordFamily, DEFAULT_MAX_ATTEMPTS,
};
pub use error::{ResolverError, Result};
pub use native::{CachingNativeHostResolver, CachingNativeLookup, NativeHostResolver, NativeLookup};
pub use remap::{HostRemapper, RemappingResolver, ResolverBackend};
pub use resolver::{AdvancedHostResolver, CacheTimeout, HostResolver, RemappingTable};
