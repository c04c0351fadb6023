//! On-disk management of the proxy's root CA.
//!
//! The CA lives in a directory as a PEM certificate and a PEM private key.
//! It is generated on first use and read back from disk once, so the
//! certificate users install always matches the key that signs leaves.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use hudsucker::certificate_authority::RcgenAuthority;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::descriptor::CertificateDescriptor;
use crate::encoding;
use crate::error::{ArgumentError, Result, SourceError};
use crate::impersonation::rcgen_authority;
use crate::material::CertificateAndKey;
use crate::source::{
    default_common_name, CertificateSource, KeyAlgorithm, MessageDigest, PemPairSource,
    RootCertificateGenerator,
};

const CA_CERT_FILENAME: &str = "tapwire-ca.crt";
const CA_KEY_FILENAME: &str = "tapwire-ca.key";
const CA_CONTAINER_FILENAME: &str = "tapwire-ca.p12";

/// Alias used for the CA entry in exported containers.
pub const DEFAULT_CONTAINER_ALIAS: &str = "tapwire";

/// Leaf certificates hudsucker keeps signed in memory.
pub const DEFAULT_AUTHORITY_CACHE_SIZE: u64 = 1_000;

/// How a new root CA is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    pub key_algorithm: KeyAlgorithm,
    pub digest: MessageDigest,
    /// Subject common name. Defaults to a host and timestamp based name.
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub validity_days: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            key_algorithm: KeyAlgorithm::default(),
            digest: MessageDigest::default(),
            common_name: None,
            organization: None,
            validity_days: 3650,
        }
    }
}

impl CaConfig {
    /// Builds a generator for this configuration.
    pub fn generator(&self) -> std::result::Result<RootCertificateGenerator, ArgumentError> {
        if self.validity_days == 0 {
            return Err(ArgumentError::InvalidDescriptor(
                "validity_days must be at least 1".into(),
            ));
        }

        let now = Utc::now();
        let common_name = self.common_name.clone().unwrap_or_else(default_common_name);
        let mut descriptor = CertificateDescriptor::builder()
            .common_name(common_name)
            .not_before(now - Duration::days(1))
            .not_after(now + Duration::days(i64::from(self.validity_days)));
        if let Some(organization) = &self.organization {
            descriptor = descriptor.organization(organization.clone());
        }

        RootCertificateGenerator::builder()
            .descriptor(descriptor.build())
            .key_algorithm(self.key_algorithm)
            .digest(self.digest)
            .build()
    }
}

/// Manages the root CA files for the proxy.
///
/// The PEM pair is read through one memoized [`PemPairSource`], so every
/// caller on a manager sees the same `Arc` until the CA is regenerated.
#[derive(Debug)]
pub struct CaManager {
    ca_dir: PathBuf,
    config: CaConfig,
    source: Mutex<Option<Arc<PemPairSource>>>,
}

impl CaManager {
    /// Creates a manager for `ca_dir` with the default CA configuration.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self::with_config(ca_dir, CaConfig::default())
    }

    /// Creates a manager for `ca_dir` that generates CAs from `config`.
    pub fn with_config(ca_dir: impl AsRef<Path>, config: CaConfig) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
            config,
            source: Mutex::new(None),
        }
    }

    /// Uses the per-user Tapwire data directory.
    pub fn with_default_dir(config: CaConfig) -> Result<Self> {
        let ca_dir = default_ca_dir().ok_or(SourceError::NoDataDir)?;
        Ok(Self::with_config(ca_dir, config))
    }

    /// Returns the CA directory.
    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    /// Returns the path to the CA certificate file.
    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    /// Returns the path to the CA private key file.
    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    /// Default location for [`export_container`](Self::export_container).
    pub fn container_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CONTAINER_FILENAME)
    }

    /// Checks if both CA files exist.
    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Returns the CA, generating and saving it first if none exists.
    pub fn ensure_ca(&self) -> Result<Arc<CertificateAndKey>> {
        let mut source = self.source.lock();
        if !self.ca_exists() {
            return self.generate_locked(&mut source);
        }
        self.load_locked(&mut source)
    }

    /// Generates a new CA and writes it over any existing files.
    ///
    /// Later loads return the new material.
    pub fn generate_ca(&self) -> Result<Arc<CertificateAndKey>> {
        let mut source = self.source.lock();
        self.generate_locked(&mut source)
    }

    /// Reads the CA from disk once and returns the cached material afterwards.
    pub fn load(&self) -> Result<Arc<CertificateAndKey>> {
        let mut source = self.source.lock();
        self.load_locked(&mut source)
    }

    fn generate_locked(
        &self,
        source: &mut Option<Arc<PemPairSource>>,
    ) -> Result<Arc<CertificateAndKey>> {
        fs::create_dir_all(&self.ca_dir).map_err(|e| SourceError::write(&self.ca_dir, e))?;

        let generator = self.config.generator()?;
        let material = generator.load()?;

        let cert_path = self.cert_path();
        write_replacing(&cert_path, &material.certificate_pem())?;
        write_replacing(&self.key_path(), &material.private_key_pem())?;
        tracing::info!("Generated new CA certificate at {:?}", cert_path);

        // Drop the old memoized pair and read back what was written.
        *source = None;
        self.load_locked(source)
    }

    fn load_locked(
        &self,
        source: &mut Option<Arc<PemPairSource>>,
    ) -> Result<Arc<CertificateAndKey>> {
        let pair = match source {
            Some(pair) => Arc::clone(pair),
            None => {
                let pair = Arc::new(PemPairSource::from_files(
                    self.cert_path(),
                    self.key_path(),
                    None,
                )?);
                *source = Some(Arc::clone(&pair));
                pair
            }
        };
        pair.load()
    }

    /// Writes the CA into a password-protected PKCS#12 container.
    pub fn export_container(&self, path: &Path, alias: &str, password: &str) -> Result<()> {
        self.load()?.save_container(path, alias, password)
    }

    /// Reads the CA certificate as DER, e.g. for installing into a trust store.
    pub fn read_cert_der(&self) -> Result<Vec<u8>> {
        let cert_path = self.cert_path();
        let pem = fs::read_to_string(&cert_path).map_err(|e| SourceError::read(&cert_path, e))?;
        Ok(encoding::parse_certificate_pem(&pem)?.as_ref().to_vec())
    }

    /// Ensures the CA exists and wraps it as a hudsucker authority.
    pub fn ensure_authority(&self, cache_size: u64) -> Result<RcgenAuthority> {
        let ca = self.ensure_ca()?;
        rcgen_authority(&ca, cache_size)
    }
}

/// Writes `contents` next to `path` and renames it into place.
fn write_replacing(path: &Path, contents: &str) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, contents).map_err(|e| SourceError::write(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| SourceError::write(path, e))
}

/// `<data dir>/ca` under the platform's per-user Tapwire directory.
pub fn default_ca_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "tapwire", "Tapwire")
        .map(|dirs| dirs.data_dir().join("ca"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_config() -> CaConfig {
        CaConfig {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            common_name: Some("Tapwire Test CA".into()),
            ..CaConfig::default()
        }
    }

    fn manager(dir: &TempDir) -> CaManager {
        CaManager::with_config(dir.path().join("ca"), fast_config())
    }

    // ==================== Path Tests ====================

    #[test]
    fn ca_manager_paths() {
        let manager = CaManager::new("/tmp/test-ca");
        assert_eq!(manager.cert_path(), PathBuf::from("/tmp/test-ca/tapwire-ca.crt"));
        assert_eq!(manager.key_path(), PathBuf::from("/tmp/test-ca/tapwire-ca.key"));
        assert_eq!(
            manager.container_path(),
            PathBuf::from("/tmp/test-ca/tapwire-ca.p12")
        );
    }

    #[test]
    fn ca_manager_not_exists_initially() {
        let dir = TempDir::new().unwrap();
        assert!(!manager(&dir).ca_exists());
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn ensure_ca_generates_if_missing() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let ca = manager.ensure_ca().unwrap();
        assert!(manager.ca_exists());
        assert!(ca.subject().unwrap().contains("Tapwire Test CA"));
    }

    #[test]
    fn ensure_ca_reuses_existing_files() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let generated = manager.generate_ca().unwrap();
        let loaded = manager.ensure_ca().unwrap();
        assert_eq!(generated.certificate(), loaded.certificate());
        assert_eq!(
            generated.private_key().secret_der(),
            loaded.private_key().secret_der()
        );
    }

    #[test]
    fn ensure_ca_returns_the_same_material_each_time() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let first = manager.ensure_ca().unwrap();
        let second = manager.ensure_ca().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &manager.load().unwrap()));
    }

    #[test]
    fn loaded_ca_is_cached_after_files_change() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let ca = manager.ensure_ca().unwrap();

        std::fs::remove_file(manager.key_path()).unwrap();
        let cached = manager.load().unwrap();
        assert!(Arc::ptr_eq(&ca, &cached));
    }

    #[test]
    fn regenerating_replaces_cached_material() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let old = manager.ensure_ca().unwrap();
        let new = manager.generate_ca().unwrap();
        assert_ne!(old.certificate(), new.certificate());
        assert!(Arc::ptr_eq(&new, &manager.ensure_ca().unwrap()));
    }

    #[test]
    fn concurrent_ensure_ca_generates_once() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(manager(&dir));
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    manager.ensure_ca().unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result));
        }
    }

    #[test]
    fn generate_ca_leaves_no_temporary_files() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.generate_ca().unwrap();

        let mut names: Vec<String> = std::fs::read_dir(manager.ca_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![CA_CERT_FILENAME, CA_KEY_FILENAME]);
    }

    #[test]
    fn read_cert_der_matches_generated_certificate() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let ca = manager.generate_ca().unwrap();
        let der = manager.read_cert_der().unwrap();
        assert_eq!(der, ca.certificate().as_ref());
    }

    #[test]
    fn read_cert_der_without_ca_fails() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir).read_cert_der().unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }

    #[test]
    fn exported_container_reloads() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let ca = manager.ensure_ca().unwrap();

        let path = manager.container_path();
        manager
            .export_container(&path, DEFAULT_CONTAINER_ALIAS, "pw")
            .unwrap();

        let source =
            crate::source::ContainerFileSource::from_file(&path, DEFAULT_CONTAINER_ALIAS, "pw")
                .unwrap();
        assert_eq!(source.load().unwrap().certificate(), ca.certificate());
    }

    #[test]
    fn ensure_authority_builds() {
        let dir = TempDir::new().unwrap();
        assert!(manager(&dir)
            .ensure_authority(DEFAULT_AUTHORITY_CACHE_SIZE)
            .is_ok());
    }

    // ==================== Config Tests ====================

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CaConfig =
            serde_json::from_str(r#"{"key_algorithm":"ecdsa-p384","digest":"sha384"}"#).unwrap();
        assert_eq!(config.key_algorithm, KeyAlgorithm::EcdsaP384);
        assert_eq!(config.digest, MessageDigest::Sha384);
        assert_eq!(config.validity_days, 3650);
        assert!(config.generator().is_ok());
    }

    #[test]
    fn config_rejects_zero_validity() {
        let config = CaConfig {
            validity_days: 0,
            ..fast_config()
        };
        assert!(config.generator().is_err());
    }

    #[test]
    fn config_rejects_mismatched_digest() {
        let config = CaConfig {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            digest: MessageDigest::Sha512,
            ..CaConfig::default()
        };
        assert!(matches!(
            config.generator(),
            Err(ArgumentError::UnsupportedAlgorithm(_))
        ));
    }
}
