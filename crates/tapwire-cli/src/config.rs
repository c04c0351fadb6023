//! `tapwire` configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tapwire_resolve::ResolverConfig;
use tapwire_trust::CaConfig;

/// Top-level configuration, read from `--config <file.json>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapwireConfig {
    /// CA directory. Defaults to the per-user data directory.
    pub ca_dir: Option<PathBuf>,
    pub ca: CaConfig,
    pub resolver: ResolverConfig,
}

impl TapwireConfig {
    /// Reads `path`, or returns defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapwire_resolve::BackendKind;
    use tapwire_trust::KeyAlgorithm;
    use tempfile::TempDir;

    #[test]
    fn missing_path_gives_defaults() {
        assert_eq!(TapwireConfig::load(None).unwrap(), TapwireConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tapwire.json");
        std::fs::write(
            &path,
            r#"{
                "ca": { "key_algorithm": "ecdsa-p256", "common_name": "Lab CA" },
                "resolver": { "backends": ["caching-native"] }
            }"#,
        )
        .unwrap();

        let config = TapwireConfig::load(Some(&path)).unwrap();
        assert_eq!(config.ca.key_algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(config.ca.common_name.as_deref(), Some("Lab CA"));
        assert_eq!(config.resolver.backends, vec![BackendKind::CachingNative]);
        assert!(config.ca_dir.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TapwireConfig::load(Some(&path)).is_err());
    }
}
