//! Signing per-host impersonation certificates with the proxy CA.

use std::fmt;

use rcgen::{ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::descriptor::CertificateDescriptor;
use crate::error::{Result, SourceError};
use crate::material::CertificateAndKey;

/// Issues leaf certificates signed by a CA.
pub struct ImpersonationSigner {
    issuer: Issuer<'static, KeyPair>,
}

impl ImpersonationSigner {
    /// Builds a signer from CA material.
    pub fn new(ca: &CertificateAndKey) -> Result<Self> {
        let key_pair = ca.signing_key()?;
        let issuer = Issuer::from_ca_cert_der(ca.certificate(), key_pair)
            .map_err(|e| SourceError::Generation(e.to_string()))?;
        Ok(Self { issuer })
    }

    /// Signs a fresh ECDSA P-256 leaf described by `descriptor`.
    pub fn sign(&self, descriptor: &CertificateDescriptor) -> Result<CertificateAndKey> {
        let mut params = descriptor.to_params()?;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from(rand::random::<u64>() >> 1));

        let leaf_key = KeyPair::generate().map_err(|e| SourceError::Generation(e.to_string()))?;
        let cert = params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(|e| SourceError::Generation(e.to_string()))?;

        tracing::debug!(
            "Signed impersonation certificate for {} ({} SANs)",
            descriptor.common_name(),
            descriptor.subject_alternative_names().len()
        );

        let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        Ok(CertificateAndKey::new(cert.der().clone(), private_key)?)
    }
}

impl fmt::Debug for ImpersonationSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpersonationSigner").finish_non_exhaustive()
    }
}

/// Adapts CA material into a hudsucker certificate authority.
///
/// `cache_size` bounds the number of leaf certificates hudsucker keeps.
pub fn rcgen_authority(
    ca: &CertificateAndKey,
    cache_size: u64,
) -> Result<hudsucker::certificate_authority::RcgenAuthority> {
    use hudsucker::rcgen::{Issuer as ProxyIssuer, KeyPair as ProxyKeyPair};
    use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

    let key_pair = ProxyKeyPair::from_pem(&ca.private_key_pem())
        .map_err(|e| SourceError::Pem(e.to_string()))?;
    let issuer = ProxyIssuer::from_ca_cert_pem(&ca.certificate_pem(), key_pair)
        .map_err(|e| SourceError::Pem(e.to_string()))?;

    Ok(hudsucker::certificate_authority::RcgenAuthority::new(
        issuer,
        cache_size,
        default_provider(),
    ))
}
