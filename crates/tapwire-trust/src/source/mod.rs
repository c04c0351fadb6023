//! Pluggable providers of CA material.
//!
//! Every provider implements [`CertificateSource`]. The file-backed and
//! generating providers memoize their first successful result, so every
//! caller observes the same `Arc<CertificateAndKey>` for the lifetime of
//! the source.

use std::sync::Arc;

use crate::error::Result;
use crate::material::CertificateAndKey;

pub(crate) mod container;
mod existing;
mod pem_pair;
mod root_generator;

pub use container::{ContainerFileSource, ContainerLocation, ProtectedContainerSource};
pub use existing::ExistingCertificateSource;
pub use pem_pair::{PemLocation, PemPairSource};
pub use root_generator::{
    default_common_name, KeyAlgorithm, MessageDigest, RootCertificateGenerator,
    RootCertificateGeneratorBuilder,
};

/// A provider of a certificate and its private key.
pub trait CertificateSource: Send + Sync {
    /// Returns the certificate and key, loading or generating them if needed.
    fn load(&self) -> Result<Arc<CertificateAndKey>>;
}

impl<S: CertificateSource + ?Sized> CertificateSource for Arc<S> {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        (**self).load()
    }
}
