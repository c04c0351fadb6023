//! Subcommand implementations.
//!
//! Each command writes its human-readable output to `out` so it can be
//! exercised without a terminal.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tapwire_resolve::{AdvancedHostResolver, HostResolver, ResolverConfig};
use tapwire_trust::encoding::{certificate_subject, parse_certificate_pem};
use tapwire_trust::{
    default_ca_dir, CaManager, CertificateDescriptor, CertificateDescriptorGenerator,
    HostnameCertificateInfoGenerator, ImpersonationSigner, PemCipher, TrustStore,
    UpstreamCertificateInfoGenerator,
};

use crate::config::TapwireConfig;

/// Output format for `ca export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// The CA certificate alone, for installing on clients.
    Pem,
    /// Certificate and key in a password-protected PKCS#12 file.
    P12,
}

/// Picks the CA directory: flag, then config file, then the data directory.
pub fn ca_manager(config: &TapwireConfig, dir: Option<&Path>) -> Result<CaManager> {
    let ca_dir = match dir.map(Path::to_path_buf).or_else(|| config.ca_dir.clone()) {
        Some(dir) => dir,
        None => default_ca_dir().context("Could not determine a data directory for the CA")?,
    };
    Ok(CaManager::with_config(ca_dir, config.ca.clone()))
}

/// `ca init`: reuses an existing CA unless `force` is set.
pub fn ca_init(manager: &CaManager, force: bool, out: &mut impl Write) -> Result<()> {
    let ca = if manager.ca_exists() && !force {
        writeln!(out, "CA already exists at {}", manager.ca_dir().display())?;
        manager.load().context("Existing CA could not be loaded")?
    } else {
        manager.generate_ca().context("Failed to generate CA")?
    };

    writeln!(out, "Subject:     {}", ca.subject()?)?;
    writeln!(out, "Certificate: {}", manager.cert_path().display())?;
    writeln!(out, "Private key: {}", manager.key_path().display())?;
    Ok(())
}

/// `ca export`: writes the CA certificate as PEM or the full CA as a password-protected container.
pub fn ca_export(
    manager: &CaManager,
    format: ExportFormat,
    path: &Path,
    password: Option<&str>,
    alias: &str,
    out: &mut impl Write,
) -> Result<()> {
    let ca = manager
        .load()
        .context("No CA found; run `tapwire ca init` first")?;

    match format {
        ExportFormat::Pem => {
            std::fs::write(path, ca.certificate_pem())
                .with_context(|| format!("Failed to write {:?}", path))?;
        }
        ExportFormat::P12 => {
            let Some(password) = password else {
                bail!("--password is required for p12 export");
            };
            ca.save_container(path, alias, password)?;
        }
    }

    writeln!(out, "Exported CA to {}", path.display())?;
    Ok(())
}

/// Describes an impersonation certificate for `hosts`.
///
/// With `upstream`, subject fields are copied from that PEM certificate.
pub fn describe(hosts: &[String], upstream: Option<&Path>) -> Result<CertificateDescriptor> {
    let descriptor = match upstream {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read upstream certificate {:?}", path))?;
            let certificate = parse_certificate_pem(&pem)?;
            UpstreamCertificateInfoGenerator.generate(hosts, Some(&certificate))?
        }
        None => HostnameCertificateInfoGenerator.generate(hosts, None)?,
    };
    Ok(descriptor)
}

/// `ca describe`: prints the leaf descriptor as JSON.
pub fn ca_describe(hosts: &[String], upstream: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let descriptor = describe(hosts, upstream)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&descriptor)?)?;
    Ok(())
}

/// `ca issue`: signs a leaf for `hosts` and writes it next to its key.
pub fn ca_issue(
    manager: &CaManager,
    hosts: &[String],
    upstream: Option<&Path>,
    out_dir: &Path,
    password: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let ca = manager.ensure_ca().context("Failed to prepare CA")?;
    let descriptor = describe(hosts, upstream)?;
    let leaf = ImpersonationSigner::new(&ca)?.sign(&descriptor)?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {:?}", out_dir))?;
    let stem = file_stem(descriptor.common_name());
    let cert_path = out_dir.join(format!("{}.crt", stem));
    let key_path = out_dir.join(format!("{}.key", stem));

    let key_pem = match password {
        Some(password) => leaf.encrypted_private_key_pem(password, PemCipher::default())?,
        None => leaf.private_key_pem(),
    };
    std::fs::write(&cert_path, leaf.certificate_pem())
        .with_context(|| format!("Failed to write {:?}", cert_path))?;
    std::fs::write(&key_path, key_pem).with_context(|| format!("Failed to write {:?}", key_path))?;

    writeln!(out, "Issued {} ({} names)", descriptor.common_name(), hosts.len())?;
    writeln!(out, "Certificate: {}", cert_path.display())?;
    writeln!(out, "Private key: {}", key_path.display())?;
    Ok(())
}

/// `trust list`: prints the subjects of the trusted CAs.
pub fn trust_list(empty: bool, pem_files: &[PathBuf], out: &mut impl Write) -> Result<()> {
    let mut store = if empty {
        TrustStore::empty()
    } else {
        TrustStore::default_trust()
    };
    for path in pem_files {
        store = store.add_pem_file(path)?;
    }

    for certificate in store.trusted_cas() {
        let subject =
            certificate_subject(certificate).unwrap_or_else(|_| "<unparsable>".to_string());
        writeln!(out, "{}", subject)?;
    }
    writeln!(out, "{} trusted certificates", store.len())?;
    Ok(())
}

/// `resolve`: applies `remaps`, then looks up each host through the configured chain.
pub fn resolve(
    config: &ResolverConfig,
    remaps: &[(String, String)],
    hosts: &[String],
    out: &mut impl Write,
) -> Result<()> {
    let chain = config.build().context("Failed to build resolver chain")?;
    for (original, replacement) in remaps {
        chain.remap_host(original, replacement);
    }

    for host in hosts {
        let addresses = chain.resolve(host);
        if addresses.is_empty() {
            writeln!(out, "{} -> (unresolved)", host)?;
        } else {
            let joined: Vec<String> = addresses.iter().map(ToString::to_string).collect();
            writeln!(out, "{} -> {}", host, joined.join(", "))?;
        }
    }
    Ok(())
}

/// Parses `FROM=TO`.
pub fn parse_remap(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => Err(format!("expected FROM=TO, got '{}'", value)),
    }
}

fn file_stem(common_name: &str) -> String {
    common_name
        .chars()
        .map(|c| match c {
            '*' => '_',
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => c,
            _ => '_',
        })
        .collect()
}
