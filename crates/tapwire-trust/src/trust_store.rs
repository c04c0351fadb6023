//! Immutable aggregates of trusted root certificates.
//!
//! A [`TrustStore`] is never mutated. Every `add_*` call returns a new
//! store whose trusted set is the union of the receiver and the addition,
//! in first-seen order. Code that wants a "current" policy keeps a
//! [`TrustPolicy`] and swaps in a new store; readers never lock.
//!
//! ```
//! use tapwire_trust::TrustStore;
//!
//! let store = TrustStore::empty().add_pem("no certificates here");
//! assert!(store.is_empty());
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::encoding;
use crate::error::{Result, SourceError};

/// An immutable set of trusted CA certificates.
#[derive(Debug, Clone)]
pub struct TrustStore {
    certificates: Arc<[CertificateDer<'static>]>,
}

impl TrustStore {
    /// A store that trusts nothing.
    pub fn empty() -> Self {
        Self {
            certificates: Arc::from(Vec::new()),
        }
    }

    /// Roots installed in the operating system's trust store.
    ///
    /// Unreadable platform roots are logged and skipped.
    pub fn platform_default() -> Self {
        let result = rustls_native_certs::load_native_certs();
        for error in &result.errors {
            tracing::warn!("Skipping platform trust root: {}", error);
        }
        tracing::debug!("Loaded {} platform trust roots", result.certs.len());
        Self::empty().add_certificates(&result.certs)
    }

    /// Mozilla's root program, compiled into the binary.
    pub fn builtin() -> Self {
        Self::empty().add_certificates(webpki_root_certs::TLS_SERVER_ROOT_CERTS)
    }

    /// Platform roots followed by the built-in roots.
    pub fn default_trust() -> Self {
        Self::platform_default().add_trust_store(&Self::builtin())
    }

    /// Trusted certificates, in insertion order.
    pub fn trusted_cas(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Returns the number of distinct certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Checks if `certificate` is in the store.
    pub fn contains(&self, certificate: &CertificateDer<'_>) -> bool {
        self.certificates
            .iter()
            .any(|c| c.as_ref() == certificate.as_ref())
    }

    /// True when both stores share the same underlying snapshot.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.certificates, &b.certificates)
    }

    /// Adds explicit certificates.
    ///
    /// An empty slice returns a store sharing this store's snapshot.
    pub fn add_certificates(&self, certificates: &[CertificateDer<'static>]) -> Self {
        if certificates.is_empty() {
            return self.clone();
        }

        let mut seen: HashSet<&[u8]> = self.certificates.iter().map(|c| c.as_ref()).collect();
        let mut merged: Vec<CertificateDer<'static>> = self.certificates.to_vec();
        for certificate in certificates {
            if seen.insert(certificate.as_ref()) {
                merged.push(certificate.clone());
            }
        }

        Self {
            certificates: Arc::from(merged),
        }
    }

    /// Adds every valid certificate block found in `pem`.
    ///
    /// Surrounding text is ignored; malformed blocks are skipped with a warning.
    pub fn add_pem(&self, pem: &str) -> Self {
        let certificates = encoding::scan_certificate_blocks(pem);
        self.add_certificates(&certificates)
    }

    /// Reads a PEM bundle from disk and adds its certificates.
    pub fn add_pem_file(&self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| SourceError::read(path, e))?;
        Ok(self.add_pem(&pem))
    }

    /// Adds the trusted-certificate entries of a container.
    ///
    /// Private-key entries are ignored.
    pub fn add_container(&self, keystore: &KeyStore) -> Self {
        let certificates: Vec<CertificateDer<'static>> = keystore
            .entries()
            .filter_map(|(alias, entry)| match entry {
                KeyStoreEntry::Certificate(certificate) => {
                    match encoding::ensure_x509(certificate.as_der()) {
                        Ok(()) => Some(CertificateDer::from(certificate.as_der().to_vec())),
                        Err(e) => {
                            tracing::warn!("Skipping container entry '{}': {}", alias, e);
                            None
                        }
                    }
                }
                _ => None,
            })
            .collect();
        self.add_certificates(&certificates)
    }

    /// Unions another store into this one.
    pub fn add_trust_store(&self, other: &TrustStore) -> Self {
        self.add_certificates(&other.certificates)
    }

    /// Converts into a rustls root store for certificate verification.
    ///
    /// Certificates rustls cannot use as trust anchors are skipped.
    pub fn root_cert_store(&self) -> RootCertStore {
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(self.certificates.iter().cloned());
        if ignored > 0 {
            tracing::warn!(
                "Ignored {} of {} trusted certificates unusable as trust anchors",
                ignored,
                added + ignored
            );
        }
        store
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::empty()
    }
}

/// The currently active trust store, replaceable at runtime.
#[derive(Debug)]
pub struct TrustPolicy {
    current: ArcSwap<TrustStore>,
}

impl TrustPolicy {
    /// Starts with `store` as the current trust store.
    pub fn new(store: TrustStore) -> Self {
        Self {
            current: ArcSwap::from_pointee(store),
        }
    }

    /// Returns the active store.
    pub fn current(&self) -> Arc<TrustStore> {
        self.current.load_full()
    }

    /// Publishes a new store; returns the one it replaced.
    pub fn replace(&self, store: TrustStore) -> Arc<TrustStore> {
        self.current.swap(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::tests::self_signed;
    use p12_keystore::Certificate;
    use tempfile::TempDir;

    fn cert(name: &str) -> CertificateDer<'static> {
        self_signed(name).0
    }

    fn as_set(store: &TrustStore) -> HashSet<Vec<u8>> {
        store.trusted_cas().iter().map(|c| c.as_ref().to_vec()).collect()
    }

    // ==================== Combinator Tests ====================

    #[test]
    fn empty_store_has_no_certificates() {
        let store = TrustStore::empty();
        assert!(store.trusted_cas().is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn union_is_commutative() {
        let a = cert("a.example");
        let b = cert("b.example");

        let ab = TrustStore::empty().add_certificates(&[a.clone()]).add_certificates(&[b.clone()]);
        let ba = TrustStore::empty().add_certificates(&[b]).add_certificates(&[a]);
        assert_eq!(as_set(&ab), as_set(&ba));
    }

    #[test]
    fn union_is_idempotent() {
        let a = cert("a.example");
        let store = TrustStore::empty().add_certificates(&[a.clone()]);
        let again = store.add_certificates(&[a]);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn adding_nothing_returns_same_snapshot() {
        let store = TrustStore::empty().add_certificates(&[cert("a.example")]);
        let same = store.add_certificates(&[]);
        assert!(TrustStore::ptr_eq(&store, &same));
    }

    #[test]
    fn add_does_not_mutate_receiver() {
        let base = TrustStore::empty();
        let extended = base.add_certificates(&[cert("a.example")]);
        assert!(base.is_empty());
        assert_eq!(extended.len(), 1);
    }

    #[test]
    fn add_trust_store_unions_sets() {
        let a = TrustStore::empty().add_certificates(&[cert("a.example")]);
        let b = TrustStore::empty().add_certificates(&[cert("b.example")]);
        let merged = a.add_trust_store(&b);
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&b.trusted_cas()[0]));
    }

    // ==================== PEM Source Tests ====================

    #[test]
    fn pem_bundle_keeps_valid_entries_only() {
        let good = cert("good.example");
        let bundle = format!(
            "{}\n-----BEGIN CERTIFICATE-----\nMIIBtruncated\n",
            encoding::certificate_pem(&good)
        );

        let store = TrustStore::empty().add_pem(&bundle);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&good));
    }

    #[test]
    fn pem_file_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.pem");
        std::fs::write(&path, encoding::certificate_pem(&cert("file.example"))).unwrap();

        let store = TrustStore::empty().add_pem_file(&path).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_pem_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = TrustStore::empty()
            .add_pem_file(dir.path().join("absent.pem"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }

    // ==================== Container Source Tests ====================

    #[test]
    fn container_contributes_only_trusted_entries() {
        let trusted = cert("trusted.example");
        let mut keystore = KeyStore::new();
        keystore.add_entry(
            "trusted",
            KeyStoreEntry::Certificate(Certificate::from_der(trusted.as_ref()).unwrap()),
        );

        let (key_cert, key) = self_signed("key.example");
        let chain = p12_keystore::PrivateKeyChain::new(
            key.secret_der(),
            [1u8; 20],
            vec![Certificate::from_der(key_cert.as_ref()).unwrap()],
        );
        keystore.add_entry("key", KeyStoreEntry::PrivateKeyChain(chain));

        let store = TrustStore::empty().add_container(&keystore);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&trusted));
        assert!(!store.contains(&key_cert));
    }

    // ==================== Built-in Trust Tests ====================

    #[test]
    fn builtin_roots_are_present() {
        let store = TrustStore::builtin();
        assert!(!store.is_empty());
        assert!(!store.root_cert_store().is_empty());
    }

    #[test]
    fn default_trust_includes_builtin() {
        let builtin = TrustStore::builtin();
        let default = TrustStore::default_trust();
        assert!(default.len() >= builtin.len());
        assert!(default.contains(&builtin.trusted_cas()[0]));
    }

    // ==================== Policy Tests ====================

    #[test]
    fn policy_swaps_current_store() {
        let policy = TrustPolicy::new(TrustStore::empty());
        let before = policy.current();

        let replaced = policy.replace(TrustStore::empty().add_certificates(&[cert("p.example")]));
        assert!(TrustStore::ptr_eq(&before, &replaced));
        assert_eq!(policy.current().len(), 1);
        assert!(before.is_empty());
    }
}
