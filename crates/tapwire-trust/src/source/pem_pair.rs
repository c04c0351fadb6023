//! Source reading a certificate and key from two PEM documents.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::encoding;
use crate::error::{ArgumentError, Result, SourceError};
use crate::material::CertificateAndKey;
use crate::source::CertificateSource;

/// Where a PEM document comes from.
#[derive(Debug, Clone)]
pub enum PemLocation {
    /// A file on disk.
    File(PathBuf),
    /// PEM text held in memory.
    Inline(String),
}

impl PemLocation {
    fn read(&self) -> Result<String> {
        match self {
            Self::File(path) => {
                std::fs::read_to_string(path).map_err(|e| SourceError::read(path, e))
            }
            Self::Inline(text) => Ok(text.clone()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::File(path) => path.as_os_str().is_empty(),
            Self::Inline(text) => text.trim().is_empty(),
        }
    }
}

/// Loads a certificate and an optionally encrypted private key, once.
pub struct PemPairSource {
    certificate: PemLocation,
    private_key: PemLocation,
    password: Option<String>,
    cached: OnceCell<Arc<CertificateAndKey>>,
}

impl PemPairSource {
    /// Validates the locations; nothing is read until the first load.
    pub fn new(
        certificate: PemLocation,
        private_key: PemLocation,
        password: Option<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        if certificate.is_empty() {
            return Err(ArgumentError::Empty("certificate PEM"));
        }
        if private_key.is_empty() {
            return Err(ArgumentError::Empty("private key PEM"));
        }

        Ok(Self {
            certificate,
            private_key,
            password,
            cached: OnceCell::new(),
        })
    }

    /// Reads both halves from files.
    pub fn from_files(
        certificate: impl Into<PathBuf>,
        private_key: impl Into<PathBuf>,
        password: Option<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        Self::new(
            PemLocation::File(certificate.into()),
            PemLocation::File(private_key.into()),
            password,
        )
    }

    fn read(&self) -> Result<CertificateAndKey> {
        let certificate = encoding::parse_certificate_pem(&self.certificate.read()?)?;
        let private_key =
            encoding::parse_private_key_pem(&self.private_key.read()?, self.password.as_deref())?;
        Ok(CertificateAndKey::new(certificate, private_key)?)
    }
}

impl fmt::Debug for PemPairSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemPairSource")
            .field("certificate", &self.certificate)
            .field("encrypted", &self.password.is_some())
            .field("loaded", &self.cached.get().is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateSource for PemPairSource {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        self.cached
            .get_or_try_init(|| self.read().map(Arc::new))
            .map(Arc::clone)
    }
}
