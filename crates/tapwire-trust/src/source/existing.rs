//! Source wrapping caller-supplied material.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{ArgumentError, Result};
use crate::material::CertificateAndKey;
use crate::source::CertificateSource;

/// Hands out material the caller already holds.
#[derive(Debug, Clone)]
pub struct ExistingCertificateSource {
    material: Arc<CertificateAndKey>,
}

impl ExistingCertificateSource {
    /// Serves `material` as is.
    pub fn new(material: impl Into<Arc<CertificateAndKey>>) -> Self {
        Self {
            material: material.into(),
        }
    }

    /// Validates and wraps a DER certificate and key.
    pub fn from_der(
        certificate: CertificateDer<'static>,
        private_key: PrivateKeyDer<'static>,
    ) -> std::result::Result<Self, ArgumentError> {
        Ok(Self::new(CertificateAndKey::new(certificate, private_key)?))
    }
}

impl CertificateSource for ExistingCertificateSource {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        Ok(Arc::clone(&self.material))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::self_signed;

    #[test]
    fn load_returns_wrapped_material() {
        let (cert, key) = self_signed("existing.example");
        let source = ExistingCertificateSource::from_der(cert.clone(), key).unwrap();

        let first = source.load().unwrap();
        let second = source.load().unwrap();
        assert_eq!(first.certificate(), &cert);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn from_der_fails_fast_on_empty_certificate() {
        let (_, key) = self_signed("existing.example");
        assert!(ExistingCertificateSource::from_der(CertificateDer::from(Vec::new()), key).is_err());
    }
}
