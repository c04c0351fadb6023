//! Sources backed by password-protected PKCS#12 containers.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::encoding;
use crate::error::{ArgumentError, Result, SourceError};
use crate::material::CertificateAndKey;
use crate::source::CertificateSource;

/// Opens PKCS#12 bytes with `password`.
pub(crate) fn open_container(bytes: &[u8], password: &str) -> Result<KeyStore> {
    KeyStore::from_pkcs12(bytes, password).map_err(|e| SourceError::Container(e.to_string()))
}

/// Extracts the private-key entry named `alias`.
pub(crate) fn material_from_container(
    keystore: &KeyStore,
    alias: &str,
) -> Result<CertificateAndKey> {
    let entry = keystore
        .entry(alias)
        .ok_or_else(|| SourceError::MissingAlias(alias.to_string()))?;

    let KeyStoreEntry::PrivateKeyChain(chain) = entry else {
        return Err(SourceError::NotPrivateKeyEntry(alias.to_string()));
    };

    let leaf = chain
        .chain()
        .first()
        .ok_or_else(|| SourceError::NotX509(alias.to_string()))?;
    encoding::ensure_x509(leaf.as_der()).map_err(|_| SourceError::NotX509(alias.to_string()))?;

    let certificate = CertificateDer::from(leaf.as_der().to_vec());
    let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));
    Ok(CertificateAndKey::new(certificate, private_key)?)
}

/// Serializes material into a new PKCS#12 container.
pub(crate) fn container_bytes(
    material: &CertificateAndKey,
    alias: &str,
    password: &str,
) -> Result<Vec<u8>> {
    if alias.is_empty() {
        return Err(ArgumentError::Empty("alias").into());
    }
    let PrivateKeyDer::Pkcs8(key) = material.private_key() else {
        return Err(SourceError::Encoding(
            "containers can only hold PKCS#8 private keys".into(),
        ));
    };

    let certificate = Certificate::from_der(material.certificate().as_ref())
        .map_err(|e| SourceError::Encoding(e.to_string()))?;
    let local_key_id: [u8; 20] = rand::random();
    let chain = PrivateKeyChain::new(key.secret_pkcs8_der(), local_key_id, vec![certificate]);

    let mut keystore = KeyStore::new();
    keystore.add_entry(alias, KeyStoreEntry::PrivateKeyChain(chain));

    keystore
        .writer(password)
        .write()
        .map_err(|e| SourceError::Encoding(e.to_string()))
}

// ============================================================================
// Protected container entry
// ============================================================================

/// Loads a named private-key entry from an opened container.
pub struct ProtectedContainerSource {
    keystore: KeyStore,
    alias: String,
}

impl ProtectedContainerSource {
    /// Selects `alias` from an already opened container.
    pub fn new(
        keystore: KeyStore,
        alias: impl Into<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(ArgumentError::Empty("alias"));
        }
        Ok(Self { keystore, alias })
    }

    /// Opens container bytes with `password` and selects `alias`.
    pub fn from_bytes(bytes: &[u8], password: &str, alias: impl Into<String>) -> Result<Self> {
        let keystore = open_container(bytes, password)?;
        Ok(Self::new(keystore, alias)?)
    }

    /// Returns the entry alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl fmt::Debug for ProtectedContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedContainerSource")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl CertificateSource for ProtectedContainerSource {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        material_from_container(&self.keystore, &self.alias).map(Arc::new)
    }
}

// ============================================================================
// Container file
// ============================================================================

/// Where a container's bytes come from.
#[derive(Debug, Clone)]
pub enum ContainerLocation {
    /// A file on disk.
    File(PathBuf),
    /// Bytes compiled into the binary, e.g. with `include_bytes!`.
    Bundled {
        name: &'static str,
        bytes: &'static [u8],
    },
}

/// Loads a container from a file or bundled bytes, once.
pub struct ContainerFileSource {
    location: ContainerLocation,
    alias: String,
    password: String,
    cached: OnceCell<Arc<CertificateAndKey>>,
}

impl ContainerFileSource {
    /// Validates the arguments; the container is opened on first load.
    pub fn new(
        location: ContainerLocation,
        alias: impl Into<String>,
        password: impl Into<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(ArgumentError::Empty("alias"));
        }
        if let ContainerLocation::File(path) = &location {
            if path.as_os_str().is_empty() {
                return Err(ArgumentError::Empty("container path"));
            }
        }

        Ok(Self {
            location,
            alias,
            password: password.into(),
            cached: OnceCell::new(),
        })
    }

    /// Reads the container from a file.
    pub fn from_file(
        path: impl Into<PathBuf>,
        alias: impl Into<String>,
        password: impl Into<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        Self::new(ContainerLocation::File(path.into()), alias, password)
    }

    /// Reads the container from bytes compiled into the binary.
    pub fn from_bundled(
        name: &'static str,
        bytes: &'static [u8],
        alias: impl Into<String>,
        password: impl Into<String>,
    ) -> std::result::Result<Self, ArgumentError> {
        Self::new(ContainerLocation::Bundled { name, bytes }, alias, password)
    }

    fn read(&self) -> Result<CertificateAndKey> {
        let keystore = match &self.location {
            ContainerLocation::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| SourceError::read(path, e))?;
                open_container(&bytes, &self.password)?
            }
            ContainerLocation::Bundled { name, bytes } => {
                tracing::debug!("Opening bundled container {}", name);
                open_container(bytes, &self.password)?
            }
        };
        material_from_container(&keystore, &self.alias)
    }
}

impl fmt::Debug for ContainerFileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerFileSource")
            .field("location", &self.location)
            .field("alias", &self.alias)
            .field("loaded", &self.cached.get().is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateSource for ContainerFileSource {
    fn load(&self) -> Result<Arc<CertificateAndKey>> {
        self.cached
            .get_or_try_init(|| self.read().map(Arc::new))
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::self_signed;
    use tempfile::TempDir;

    fn material(name: &str) -> CertificateAndKey {
        let (cert, key) = self_signed(name);
        CertificateAndKey::new(cert, key).unwrap()
    }

    fn leak(bytes: Vec<u8>) -> &'static [u8] {
        Box::leak(bytes.into_boxed_slice())
    }

    // ==================== Protected Container Tests ====================

    #[test]
    fn protected_container_loads_alias() {
        let original = material("p12.example");
        let bytes = container_bytes(&original, "proxy", "secret").unwrap();

        let source = ProtectedContainerSource::from_bytes(&bytes, "secret", "proxy").unwrap();
        let loaded = source.load().unwrap();
        assert_eq!(loaded.certificate(), original.certificate());
        assert_eq!(
            loaded.private_key().secret_der(),
            original.private_key().secret_der()
        );
    }

    #[test]
    fn protected_container_reports_missing_alias() {
        let bytes = container_bytes(&material("p12.example"), "proxy", "secret").unwrap();
        let source = ProtectedContainerSource::from_bytes(&bytes, "secret", "other").unwrap();

        assert!(matches!(source.load(), Err(SourceError::MissingAlias(a)) if a == "other"));
    }

    #[test]
    fn protected_container_rejects_certificate_only_entry() {
        let original = material("trusted.example");
        let mut keystore = KeyStore::new();
        let cert = Certificate::from_der(original.certificate().as_ref()).unwrap();
        keystore.add_entry("ca", KeyStoreEntry::Certificate(cert));

        let source = ProtectedContainerSource::new(keystore, "ca").unwrap();
        assert!(matches!(source.load(), Err(SourceError::NotPrivateKeyEntry(_))));
    }

    #[test]
    fn protected_container_rejects_wrong_password() {
        let bytes = container_bytes(&material("p12.example"), "proxy", "secret").unwrap();
        let err = ProtectedContainerSource::from_bytes(&bytes, "wrong", "proxy").unwrap_err();
        assert!(matches!(err, SourceError::Container(_)));
    }

    #[test]
    fn protected_container_requires_alias() {
        assert!(ProtectedContainerSource::new(KeyStore::new(), "").is_err());
    }

    // ==================== Container File Tests ====================

    #[test]
    fn container_file_memoizes_first_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca.p12");
        material("file.example")
            .save_container(&path, "ca", "pw")
            .unwrap();

        let source = ContainerFileSource::from_file(&path, "ca", "pw").unwrap();
        let first = source.load().unwrap();

        // Deleting the file proves the second call does not re-read it.
        std::fs::remove_file(&path).unwrap();
        let second = source.load().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn container_file_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let source =
            ContainerFileSource::from_file(dir.path().join("absent.p12"), "ca", "pw").unwrap();
        assert!(matches!(source.load(), Err(SourceError::Read { .. })));
    }

    #[test]
    fn container_file_retries_after_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.p12");
        let source = ContainerFileSource::from_file(&path, "ca", "pw").unwrap();
        assert!(source.load().is_err());

        material("late.example")
            .save_container(&path, "ca", "pw")
            .unwrap();
        assert!(source.load().is_ok());
    }

    #[test]
    fn bundled_container_loads() {
        let bytes = leak(container_bytes(&material("bundled.example"), "ca", "pw").unwrap());
        let source = ContainerFileSource::from_bundled("test.p12", bytes, "ca", "pw").unwrap();
        assert!(source.load().is_ok());
    }

    #[test]
    fn container_file_requires_path_and_alias() {
        assert!(ContainerFileSource::from_file("", "ca", "pw").is_err());
        assert!(ContainerFileSource::from_file("ca.p12", "", "pw").is_err());
    }
}
