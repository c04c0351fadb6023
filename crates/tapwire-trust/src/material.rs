//! Certificate and private key pairs.

use std::fmt;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::encoding::{self, PemCipher};
use crate::error::{ArgumentError, Result, SourceError};
use crate::source::container;

/// An X.509 certificate together with its private key.
///
/// Both halves are always present. Values are never mutated after
/// construction; sources hand them out behind an `Arc`.
pub struct CertificateAndKey {
    certificate: CertificateDer<'static>,
    private_key: PrivateKeyDer<'static>,
}

impl CertificateAndKey {
    /// Pairs a certificate with its private key.
    ///
    /// PKCS#1 and SEC1 keys are stored as PKCS#8. Fails if either half is
    /// empty, the certificate is not X.509 or the key cannot be rewrapped.
    pub fn new(
        certificate: CertificateDer<'static>,
        private_key: PrivateKeyDer<'static>,
    ) -> std::result::Result<Self, ArgumentError> {
        if certificate.as_ref().is_empty() {
            return Err(ArgumentError::Empty("certificate"));
        }
        if private_key.secret_der().is_empty() {
            return Err(ArgumentError::Empty("private key"));
        }
        encoding::ensure_x509(certificate.as_ref()).map_err(ArgumentError::InvalidCertificate)?;

        let private_key = match private_key {
            PrivateKeyDer::Pkcs8(_) => private_key,
            legacy => {
                let pkcs8 =
                    encoding::to_pkcs8(&legacy).map_err(ArgumentError::InvalidPrivateKey)?;
                tracing::debug!("Rewrapped private key as PKCS#8");
                PrivateKeyDer::Pkcs8(pkcs8)
            }
        };

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Returns the DER-encoded certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Returns the private key.
    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    /// Returns the certificate as PEM.
    pub fn certificate_pem(&self) -> String {
        encoding::certificate_pem(&self.certificate)
    }

    /// Returns the private key as unencrypted PEM.
    pub fn private_key_pem(&self) -> String {
        encoding::private_key_pem(&self.private_key)
    }

    /// Returns the private key as password-protected PEM.
    pub fn encrypted_private_key_pem(&self, password: &str, cipher: PemCipher) -> Result<String> {
        encoding::encrypted_private_key_pem(&self.private_key, password, cipher)
    }

    /// Saves certificate and key into a new PKCS#12 container file.
    pub fn save_container(&self, path: &Path, alias: &str, password: &str) -> Result<()> {
        let bytes = container::container_bytes(self, alias, password)?;
        std::fs::write(path, bytes).map_err(|e| SourceError::write(path, e))?;
        tracing::info!("Saved certificate container to {:?}", path);
        Ok(())
    }

    /// Returns the certificate subject as an RFC 4514 string.
    pub fn subject(&self) -> Result<String> {
        encoding::certificate_subject(&self.certificate)
    }

    /// Returns an rcgen key pair for signing with this key.
    pub fn signing_key(&self) -> Result<rcgen::KeyPair> {
        let PrivateKeyDer::Pkcs8(key) = &self.private_key else {
            return Err(SourceError::Encoding(
                "signing requires a PKCS#8 private key".into(),
            ));
        };
        rcgen::KeyPair::try_from(key.secret_pkcs8_der())
            .map_err(|e| SourceError::Encoding(e.to_string()))
    }
}

impl Clone for CertificateAndKey {
    fn clone(&self) -> Self {
        Self {
            certificate: self.certificate.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl fmt::Debug for CertificateAndKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAndKey")
            .field("certificate_len", &self.certificate.as_ref().len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::{legacy_key_bytes, self_signed};
    use rustls::pki_types::{PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer};

    #[test]
    fn new_rejects_empty_certificate() {
        let (_, key) = self_signed("x.example");
        let err = CertificateAndKey::new(CertificateDer::from(Vec::new()), key).unwrap_err();
        assert!(matches!(err, ArgumentError::Empty("certificate")));
    }

    #[test]
    fn new_rejects_empty_key() {
        let (cert, _) = self_signed("x.example");
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(Vec::new()));
        let err = CertificateAndKey::new(cert, key).unwrap_err();
        assert!(matches!(err, ArgumentError::Empty("private key")));
    }

    #[test]
    fn new_rejects_non_x509_bytes() {
        let (_, key) = self_signed("x.example");
        let err = CertificateAndKey::new(CertificateDer::from(vec![0u8; 16]), key).unwrap_err();
        assert!(matches!(err, ArgumentError::InvalidCertificate(_)));
    }

    #[test]
    fn signing_key_round_trips() {
        let (cert, key) = self_signed("sign.example");
        let material = CertificateAndKey::new(cert, key).unwrap();
        let key_pair = material.signing_key().unwrap();
        assert_eq!(key_pair.serialize_der(), material.private_key().secret_der());
    }

    #[test]
    fn sec1_key_is_stored_as_pkcs8() {
        let (cert, key) = self_signed("sec1.example");
        let sec1 = PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(legacy_key_bytes(&key)));

        let material = CertificateAndKey::new(cert, sec1).unwrap();
        assert!(matches!(material.private_key(), PrivateKeyDer::Pkcs8(_)));
        assert!(material.signing_key().is_ok());
        assert!(material
            .encrypted_private_key_pem("pw", PemCipher::Aes128Cbc)
            .is_ok());
    }

    #[test]
    fn unreadable_legacy_key_is_rejected() {
        let (cert, _) = self_signed("bad-key.example");
        let key = PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(vec![1, 2, 3]));
        let err = CertificateAndKey::new(cert, key).unwrap_err();
        assert!(matches!(err, ArgumentError::InvalidPrivateKey(_)));
    }

    #[test]
    fn debug_redacts_private_key() {
        let (cert, key) = self_signed("debug.example");
        let material = CertificateAndKey::new(cert, key).unwrap();
        let debug = format!("{:?}", material);
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn subject_contains_common_name() {
        let (cert, key) = self_signed("subject.example");
        let material = CertificateAndKey::new(cert, key).unwrap();
        // rcgen's default subject is "rcgen self signed cert"
        assert!(material.subject().unwrap().contains("CN="));
    }
}
