//! Generation of a fresh self-signed root CA.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::OnceCell;
use rcgen::{
    BasicConstraints, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, RsaKeySize,
    SerialNumber, SignatureAlgorithm,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};

use crate::descriptor::CertificateDescriptor;
use crate::encoding::PemCipher;
use crate::error::{ArgumentError, Result, SourceError};
use crate::material::CertificateAndKey;
use crate::source::CertificateSource;

/// Longest common name placed on a generated CA.
const MAX_COMMON_NAME_CHARS: usize = 64;

/// Asymmetric key type of the generated CA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[default]
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[serde(rename = "rsa-3072")]
    Rsa3072,
    #[serde(rename = "rsa-4096")]
    Rsa4096,
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
    #[serde(rename = "ecdsa-p384")]
    EcdsaP384,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyAlgorithm {
    fn rsa_key_size(self) -> Option<RsaKeySize> {
        match self {
            Self::Rsa2048 => Some(RsaKeySize::_2048),
            Self::Rsa3072 => Some(RsaKeySize::_3072),
            Self::Rsa4096 => Some(RsaKeySize::_4096),
            _ => None,
        }
    }
}

/// Message digest used when signing the CA certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDigest {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

fn signature_algorithm(
    key_algorithm: KeyAlgorithm,
    digest: MessageDigest,
) -> std::result::Result<&'static SignatureAlgorithm, ArgumentError> {
    match (key_algorithm, digest) {
        (KeyAlgorithm::Ed25519, _) => Ok(&rcgen::PKCS_ED25519),
        (KeyAlgorithm::EcdsaP256, MessageDigest::Sha256) => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
        (KeyAlgorithm::EcdsaP384, MessageDigest::Sha384) => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
        (rsa, digest) if rsa.rsa_key_size().is_some() => Ok(match digest {
            MessageDigest::Sha256 => &rcgen::PKCS_RSA_SHA256,
            MessageDigest::Sha384 => &rcgen::PKCS_RSA_SHA384,
            MessageDigest::Sha512 => &rcgen::PKCS_RSA_SHA512,
        }),
        (key_algorithm, digest) => Err(ArgumentError::UnsupportedAlgorithm(format!(
            "{:?} cannot sign with {:?}",
            key_algorithm, digest
        ))),
    }
}

/// Default CA common name: `Generated CA (<host>) <timestamp>`, at most 64 characters.
pub fn default_common_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let name = format!(
        "Generated CA ({}) {}",
        host,
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    name.chars().take(MAX_COMMON_NAME_CHARS).collect()
}

/// Generates a self-signed root CA on first use and keeps it.
///
/// Every call to [`load`](CertificateSource::load) returns the same pair, so
/// the exported certificate always matches the key used for signing.
pub struct RootCertificateGenerator {
    descriptor: CertificateDescriptor,
    key_algorithm: KeyAlgorithm,
    signature_algorithm: &'static SignatureAlgorithm,
    cached: OnceCell<Arc<CertificateAndKey>>,
}

impl RootCertificateGenerator {
    /// RSA-2048 / SHA-256 CA with the default descriptor.
    pub fn new() -> Self {
        Self {
            descriptor: default_descriptor(),
            key_algorithm: KeyAlgorithm::default(),
            signature_algorithm: &rcgen::PKCS_RSA_SHA256,
            cached: OnceCell::new(),
        }
    }

    /// Starts a builder with a default descriptor, RSA-2048 and SHA-256.
    pub fn builder() -> RootCertificateGeneratorBuilder {
        RootCertificateGeneratorBuilder::default()
    }

    /// Returns the subject and validity of the generated CA.
    pub fn descriptor(&self) -> &CertificateDescriptor {
        &self.descriptor
    }

    /// Returns the key algorithm of the generated CA.
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        self.key_algorithm
    }

    fn generate(&self) -> Result<CertificateAndKey> {
        let key_pair = match self.key_algorithm.rsa_key_size() {
            Some(size) => KeyPair::generate_rsa_for(self.signature_algorithm, size),
            None => KeyPair::generate_for(self.signature_algorithm),
        }
        .map_err(|e| SourceError::Generation(e.to_string()))?;

        let mut params = self.descriptor.to_params()?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.serial_number = Some(SerialNumber::from(rand::random::<u64>() >> 1));

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| SourceError::Generation(e.to_string()))?;

        tracing::info!(
            "Generated root CA '{}' ({:?})",
            self.descriptor.common_name(),
            self.key_algorithm
        );

        let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok(CertificateAndKey::new(cert.der().clone(), private_key)?)
    }

    /// PEM-encodes the generated certificate.
    pub fn encode_certificate_pem(&self) -> Result<String> {
        Ok(self.load()?.certificate_pem())
    }

    /// PEM-encodes the generated key, encrypted with AES-128-CBC when a password is given.
    pub fn encode_private_key_pem(&self, password: Option<&str>) -> Result<String> {
        self.encode_private_key_pem_with_cipher(password, PemCipher::default())
    }

    /// PEM-encodes the generated key with an explicit cipher.
    pub fn encode_private_key_pem_with_cipher(
        &self,
        password: Option<&str>,
        cipher: PemCipher,
    ) -> Result<String> {
        let material = self.load()?;
        match password {
            Some(password) => material.encrypted_private_key_pem(password, cipher),
            None => Ok(material.private_key_pem()),
        }
    }

    /// Saves the generated pair into a new PKCS#12 container file.
    pub fn save_container(&self, path: &Path, alias: &str, password: &str) -> Result<()> {
        self.load()?.save_container(path, alias, password)
    }
}

impl Default for RootCertificateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RootCertificateGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCertificateGenerator")
            .field("common_name", &self.descriptor.common_name())
            .field("key_algorithm", &self.key_algorithm)
            .field("generated", &self.cached.get().is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateSource for RootCertificateGenerator {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        self.cached
            .get_or_try_init(|| self.generate().map(Arc::new))
            .map(Arc::clone)
    }
}

fn default_descriptor() -> CertificateDescriptor {
    CertificateDescriptor::builder()
        .common_name(default_common_name())
        .build()
}

/// Builder for [`RootCertificateGenerator`].
#[derive(Debug, Clone, Default)]
pub struct RootCertificateGeneratorBuilder {
    descriptor: Option<CertificateDescriptor>,
    key_algorithm: KeyAlgorithm,
    digest: MessageDigest,
}

impl RootCertificateGeneratorBuilder {
    /// Sets the CA subject and validity.
    pub fn descriptor(mut self, descriptor: CertificateDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Sets the key algorithm of the CA.
    pub fn key_algorithm(mut self, key_algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = key_algorithm;
        self
    }

    /// Sets the signature digest.
    pub fn digest(mut self, digest: MessageDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Validates the configuration.
    ///
    /// Fails on an unusable descriptor or a key/digest mismatch.
    pub fn build(self) -> std::result::Result<RootCertificateGenerator, ArgumentError> {
        let signature_algorithm = signature_algorithm(self.key_algorithm, self.digest)?;
        let descriptor = self.descriptor.unwrap_or_else(default_descriptor);
        descriptor.validate()?;

        Ok(RootCertificateGenerator {
            descriptor,
            key_algorithm: self.key_algorithm,
            signature_algorithm,
            cached: OnceCell::new(),
        })
    }
}
