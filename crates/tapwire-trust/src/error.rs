//! Error types for CA material and trust handling.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid input supplied by the caller.
///
/// Raised at construction or call time, before any material is read.
#[derive(Debug, Error)]
pub enum ArgumentError {
    /// Descriptor generation needs at least one hostname.
    #[error("at least one hostname is required")]
    EmptyHostnames,

    /// A required value was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Certificate bytes are not a parsable X.509 certificate.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Private key bytes cannot be read as RSA, EC or Ed25519.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Descriptor cannot be used to synthesize a certificate.
    #[error("invalid certificate descriptor: {0}")]
    InvalidDescriptor(String),

    /// Key algorithm and digest do not combine.
    #[error("unsupported algorithm combination: {0}")]
    UnsupportedAlgorithm(String),
}

/// Failure to load, decode, generate or export certificate material.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The container has no entry under the requested alias.
    #[error("no entry named '{0}' in container")]
    MissingAlias(String),

    /// The entry exists but holds no private key.
    #[error("entry '{0}' is not a private key entry")]
    NotPrivateKeyEntry(String),

    /// The entry's certificate is not X.509.
    #[error("entry '{0}' does not hold an X.509 certificate")]
    NotX509(String),

    /// The container could not be opened (wrong password, corrupt data).
    #[error("failed to open container: {0}")]
    Container(String),

    /// Failed to read a file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// PEM text could not be decoded.
    #[error("failed to parse PEM: {0}")]
    Pem(String),

    /// An encrypted private key could not be decrypted.
    #[error("failed to decrypt private key: {0}")]
    Decrypt(String),

    /// Key or certificate generation failed.
    #[error("failed to generate certificate: {0}")]
    Generation(String),

    /// No per-user data directory could be determined.
    #[error("could not determine a data directory for the CA")]
    NoDataDir,

    /// Material could not be encoded for export.
    #[error("failed to encode: {0}")]
    Encoding(String),

    /// Invalid input surfaced during loading.
    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

impl SourceError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Result type for certificate source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
