//! Tapwire Trust - CA material and trust stores for the intercepting proxy.
//!
//! This crate answers two questions for a TLS-intercepting proxy: which
//! certificate authority signs the certificates it presents to clients,
//! and which upstream CAs it is willing to trust.
//!
//! ## Features
//!
//! - Pluggable [`CertificateSource`]s: in-memory material, PKCS#12
//!   containers, PEM pairs (optionally encrypted) and a generated root CA
//! - First successful load is memoized; every caller gets the same `Arc`
//! - [`CertificateDescriptor`]s for per-host impersonation certificates,
//!   derived from hostnames or from the real upstream certificate
//! - [`ImpersonationSigner`] to sign leaves, and a hudsucker authority adapter
//! - Immutable [`TrustStore`] combinators over platform, built-in, PEM and
//!   container roots
//! - [`CaManager`] for the on-disk CA directory
//!
//! ## Architecture
//!
//! ```text
//! CertificateSource ──load()──► Arc<CertificateAndKey> ──► ImpersonationSigner
//!                                                               ▲
//! CertificateDescriptorGenerator ──generate(hosts, upstream)────┘
//!
//! TrustStore::empty().add_*() ──► TrustPolicy::replace() ──► root_cert_store()
//! ```

mod ca;
pub mod descriptor;
pub mod encoding;
mod error;
mod impersonation;
mod material;
pub mod source;
mod trust_store;

pub use ca::{
    default_ca_dir, CaConfig, CaManager, DEFAULT_AUTHORITY_CACHE_SIZE, DEFAULT_CONTAINER_ALIAS,
};
pub use descriptor::{
    CertificateDescriptor, CertificateDescriptorBuilder, CertificateDescriptorGenerator,
    HostnameCertificateInfoGenerator, UpstreamCertificateInfoGenerator,
};
pub use encoding::PemCipher;
pub use error::{ArgumentError, Result, SourceError};
pub use impersonation::{rcgen_authority, ImpersonationSigner};
pub use material::CertificateAndKey;
pub use source::{
    CertificateSource, ContainerFileSource, ContainerLocation, ExistingCertificateSource,
    KeyAlgorithm, MessageDigest, PemLocation, PemPairSource, ProtectedContainerSource,
    RootCertificateGenerator, RootCertificateGeneratorBuilder,
};
pub use trust_store::{TrustPolicy, TrustStore};

pub use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Re-exported so callers can build containers for [`TrustStore::add_container`].
pub use p12_keystore::KeyStore;
