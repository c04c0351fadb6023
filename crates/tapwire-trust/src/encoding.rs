//! PEM encoding and decoding of certificates and private keys.

use pkcs8::der::asn1::AnyRef;
use pkcs8::der::Encode;
use pkcs8::pkcs5::pbes2;
use pkcs8::{
    AlgorithmIdentifierRef, EncryptedPrivateKeyInfo, LineEnding, ObjectIdentifier, PrivateKeyInfo,
};
use rand::RngCore;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SourceError};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// PBKDF2 rounds used when encrypting private keys.
const PBKDF2_ITERATIONS: u32 = 10_000;

const RSA_ENCRYPTION_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Symmetric cipher protecting an exported private key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PemCipher {
    /// PBES2 with PBKDF2-SHA256 and AES-128-CBC.
    #[default]
    Aes128Cbc,
    /// PBES2 with PBKDF2-SHA256 and AES-256-CBC.
    Aes256Cbc,
}

/// Encodes a DER certificate as a `CERTIFICATE` PEM block.
pub fn certificate_pem(certificate: &CertificateDer<'_>) -> String {
    pem::encode(&pem::Pem::new(CERTIFICATE_LABEL, certificate.as_ref().to_vec()))
}

/// Encodes a private key as an unencrypted PEM block.
///
/// The label follows the key's container format.
pub fn private_key_pem(key: &PrivateKeyDer<'_>) -> String {
    let label = match key {
        PrivateKeyDer::Pkcs1(_) => "RSA PRIVATE KEY",
        PrivateKeyDer::Sec1(_) => "EC PRIVATE KEY",
        _ => "PRIVATE KEY",
    };
    pem::encode(&pem::Pem::new(label, key.secret_der().to_vec()))
}

/// Encodes a PKCS#8 private key as an `ENCRYPTED PRIVATE KEY` PEM block.
pub fn encrypted_private_key_pem(
    key: &PrivateKeyDer<'_>,
    password: &str,
    cipher: PemCipher,
) -> Result<String> {
    let PrivateKeyDer::Pkcs8(pkcs8_key) = key else {
        return Err(SourceError::Encoding(
            "only PKCS#8 private keys can be encrypted".into(),
        ));
    };

    let info = PrivateKeyInfo::try_from(pkcs8_key.secret_pkcs8_der())
        .map_err(|e| SourceError::Encoding(e.to_string()))?;

    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = match cipher {
        PemCipher::Aes128Cbc => {
            pbes2::Parameters::pbkdf2_sha256_aes128cbc(PBKDF2_ITERATIONS, &salt, &iv)
        }
        PemCipher::Aes256Cbc => {
            pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv)
        }
    }
    .map_err(|e| SourceError::Encoding(e.to_string()))?;

    let document = info
        .encrypt_with_params(params, password)
        .map_err(|e| SourceError::Encoding(e.to_string()))?;
    let encoded = document
        .to_pem(ENCRYPTED_KEY_LABEL, LineEnding::LF)
        .map_err(|e| SourceError::Encoding(e.to_string()))?;

    Ok((*encoded).clone())
}

/// Reads the first certificate from PEM text.
pub fn parse_certificate_pem(text: &str) -> Result<CertificateDer<'static>> {
    let mut reader = text.as_bytes();
    let certificate = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| SourceError::Pem("no certificate block found".into()))?
        .map_err(|e| SourceError::Pem(e.to_string()))?;

    ensure_x509(certificate.as_ref()).map_err(SourceError::Pem)?;
    Ok(certificate)
}

/// Reads the first private key from PEM text.
///
/// `ENCRYPTED PRIVATE KEY` blocks need `password`.
pub(crate) fn parse_private_key_pem(
    text: &str,
    password: Option<&str>,
) -> Result<PrivateKeyDer<'static>> {
    let blocks = pem::parse_many(text).map_err(|e| SourceError::Pem(e.to_string()))?;

    for block in blocks {
        match block.tag() {
            ENCRYPTED_KEY_LABEL => {
                let password = password.ok_or_else(|| {
                    SourceError::Decrypt("key is encrypted but no password was supplied".into())
                })?;
                let info = EncryptedPrivateKeyInfo::try_from(block.contents())
                    .map_err(|e| SourceError::Pem(e.to_string()))?;
                let document = info
                    .decrypt(password)
                    .map_err(|e| SourceError::Decrypt(e.to_string()))?;
                return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    document.as_bytes().to_vec(),
                )));
            }
            "PRIVATE KEY" => {
                return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                    block.into_contents(),
                )))
            }
            "RSA PRIVATE KEY" => {
                return Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(
                    block.into_contents(),
                )))
            }
            "EC PRIVATE KEY" => {
                return Ok(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(
                    block.into_contents(),
                )))
            }
            _ => continue,
        }
    }

    Err(SourceError::Pem("no private key block found".into()))
}

/// Rewraps a PKCS#1 RSA or SEC1 EC key as PKCS#8.
///
/// PKCS#8 keys are returned unchanged.
pub(crate) fn to_pkcs8(
    key: &PrivateKeyDer<'_>,
) -> std::result::Result<PrivatePkcs8KeyDer<'static>, String> {
    let curve = match key {
        PrivateKeyDer::Pkcs8(pkcs8) => return Ok(pkcs8.clone_key()),
        PrivateKeyDer::Pkcs1(_) => None,
        PrivateKeyDer::Sec1(_) => Some(sec1_curve(key)?),
        _ => return Err("unsupported private key format".into()),
    };

    let algorithm = match &curve {
        Some(curve) => AlgorithmIdentifierRef {
            oid: EC_PUBLIC_KEY_OID,
            parameters: Some(AnyRef::from(curve)),
        },
        None => AlgorithmIdentifierRef {
            oid: RSA_ENCRYPTION_OID,
            parameters: Some(AnyRef::NULL),
        },
    };
    let der = PrivateKeyInfo::new(algorithm, key.secret_der())
        .to_der()
        .map_err(|e| e.to_string())?;
    Ok(PrivatePkcs8KeyDer::from(der))
}

fn sec1_curve(key: &PrivateKeyDer<'_>) -> std::result::Result<ObjectIdentifier, String> {
    let key_pair = rcgen::KeyPair::try_from(key).map_err(|e| e.to_string())?;
    let algorithm = key_pair.algorithm();
    if algorithm == &rcgen::PKCS_ECDSA_P256_SHA256 {
        Ok(SECP256R1_OID)
    } else if algorithm == &rcgen::PKCS_ECDSA_P384_SHA384 {
        Ok(SECP384R1_OID)
    } else {
        Err("unsupported EC private key curve".into())
    }
}

/// Extracts every valid certificate block from arbitrary text.
///
/// Malformed or truncated blocks are skipped with a warning.
pub(crate) fn scan_certificate_blocks(text: &str) -> Vec<CertificateDer<'static>> {
    let mut certificates = Vec::new();
    let mut rest = text;
    let mut index = 0usize;

    while let Some(start) = rest.find(BEGIN_CERTIFICATE) {
        let block_start = &rest[start..];
        let body = &block_start[BEGIN_CERTIFICATE.len()..];
        index += 1;

        let end = body.find(END_CERTIFICATE);
        let next_begin = body.find(BEGIN_CERTIFICATE);

        match (end, next_begin) {
            (Some(end), Some(next)) if next < end => {
                tracing::warn!("Skipping certificate block {}: missing END marker", index);
                rest = &body[next..];
            }
            (Some(end), _) => {
                let block_len = BEGIN_CERTIFICATE.len() + end + END_CERTIFICATE.len();
                match decode_certificate_block(&block_start[..block_len]) {
                    Ok(certificate) => certificates.push(certificate),
                    Err(e) => {
                        tracing::warn!("Skipping certificate block {}: {}", index, e);
                    }
                }
                rest = &block_start[block_len..];
            }
            (None, _) => {
                tracing::warn!("Skipping certificate block {}: missing END marker", index);
                break;
            }
        }
    }

    certificates
}

fn decode_certificate_block(block: &str) -> std::result::Result<CertificateDer<'static>, String> {
    let parsed = pem::parse(block).map_err(|e| e.to_string())?;
    ensure_x509(parsed.contents())?;
    Ok(CertificateDer::from(parsed.into_contents()))
}

/// Returns a certificate's subject as an RFC 4514 string.
pub fn certificate_subject(certificate: &CertificateDer<'_>) -> Result<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(certificate.as_ref())
        .map_err(|e| SourceError::Pem(e.to_string()))?;
    Ok(parsed.subject().to_string())
}

/// Fails unless `der` parses as an X.509 certificate.
pub(crate) fn ensure_x509(der: &[u8]) -> std::result::Result<(), String> {
    x509_parser::parse_x509_certificate(der)
        .map(|_| ())
        .map_err(|e| format!("not an X.509 certificate: {}", e))
}
