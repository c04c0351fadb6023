//! Certificate descriptors and the generators that derive them.
//!
//! A [`CertificateDescriptor`] describes the subject, validity window and
//! alternative names of a certificate to synthesize. Generators turn the
//! hostnames observed on an intercepted connection into a descriptor for
//! the impersonation certificate presented to the client.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rcgen::{CertificateParams, DnType, DnValue, DistinguishedName};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use x509_parser::extensions::GeneralName;
use x509_parser::x509::AttributeTypeAndValue;

use crate::error::{ArgumentError, Result, SourceError};

/// Organization placed on impersonation certificates.
pub const IMPERSONATION_ORGANIZATION: &str = "Impersonated Certificate";

/// Organizational unit placed on impersonation certificates.
pub const IMPERSONATION_ORGANIZATIONAL_UNIT: &str = "Tapwire MITM";

/// Default distance of `not_before` and `not_after` from now.
pub const DEFAULT_VALIDITY_MARGIN_DAYS: i64 = 365;

/// PKCS#9 emailAddress attribute.
const EMAIL_ADDRESS_OID: &[u64] = &[1, 2, 840, 113549, 1, 9, 1];

/// Subject attributes, validity window and alternative names of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDescriptor {
    common_name: String,
    organization: Option<String>,
    organizational_unit: Option<String>,
    email: Option<String>,
    locality: Option<String>,
    state: Option<String>,
    country_code: Option<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    #[serde(default)]
    subject_alternative_names: Vec<String>,
}

impl CertificateDescriptor {
    /// Starts a builder with a validity window of now ± one year.
    pub fn builder() -> CertificateDescriptorBuilder {
        CertificateDescriptorBuilder::default()
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn organizational_unit(&self) -> Option<&str> {
        self.organizational_unit.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn locality(&self) -> Option<&str> {
        self.locality.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// DNS names added as subject alternative names.
    pub fn subject_alternative_names(&self) -> &[String] {
        &self.subject_alternative_names
    }

    /// Checks that the descriptor can be used to synthesize a certificate.
    pub fn validate(&self) -> std::result::Result<(), ArgumentError> {
        if self.common_name.trim().is_empty() {
            return Err(ArgumentError::InvalidDescriptor(
                "common name must not be empty".into(),
            ));
        }
        if self.not_before >= self.not_after {
            return Err(ArgumentError::InvalidDescriptor(format!(
                "not_before ({}) must precede not_after ({})",
                self.not_before, self.not_after
            )));
        }
        Ok(())
    }

    /// Builds rcgen parameters for this descriptor.
    pub(crate) fn to_params(&self) -> Result<CertificateParams> {
        self.validate()?;

        let mut params = CertificateParams::new(self.subject_alternative_names.clone())
            .map_err(|e| SourceError::Generation(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        let attributes = [
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.organizational_unit),
            (DnType::LocalityName, &self.locality),
            (DnType::StateOrProvinceName, &self.state),
            (DnType::CountryName, &self.country_code),
            (DnType::CustomDnType(EMAIL_ADDRESS_OID.to_vec()), &self.email),
        ];
        for (dn_type, value) in attributes {
            if let Some(value) = value {
                dn.push(dn_type, DnValue::Utf8String(value.clone()));
            }
        }
        params.distinguished_name = dn;
        params.not_before = to_offset(self.not_before)?;
        params.not_after = to_offset(self.not_after)?;

        Ok(params)
    }
}

fn to_offset(timestamp: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(timestamp.timestamp())
        .map_err(|e| SourceError::Generation(format!("timestamp out of range: {}", e)))
}

/// Builder for [`CertificateDescriptor`].
#[derive(Debug, Clone)]
pub struct CertificateDescriptorBuilder {
    descriptor: CertificateDescriptor,
}

impl Default for CertificateDescriptorBuilder {
    fn default() -> Self {
        let now = Utc::now();
        let margin = Duration::days(DEFAULT_VALIDITY_MARGIN_DAYS);
        Self {
            descriptor: CertificateDescriptor {
                common_name: String::new(),
                organization: None,
                organizational_unit: None,
                email: None,
                locality: None,
                state: None,
                country_code: None,
                not_before: now - margin,
                not_after: now + margin,
                subject_alternative_names: Vec::new(),
            },
        }
    }
}

impl CertificateDescriptorBuilder {
    pub fn common_name(mut self, value: impl Into<String>) -> Self {
        self.descriptor.common_name = value.into();
        self
    }

    pub fn organization(mut self, value: impl Into<String>) -> Self {
        self.descriptor.organization = Some(value.into());
        self
    }

    pub fn organizational_unit(mut self, value: impl Into<String>) -> Self {
        self.descriptor.organizational_unit = Some(value.into());
        self
    }

    pub fn email(mut self, value: impl Into<String>) -> Self {
        self.descriptor.email = Some(value.into());
        self
    }

    pub fn locality(mut self, value: impl Into<String>) -> Self {
        self.descriptor.locality = Some(value.into());
        self
    }

    pub fn state(mut self, value: impl Into<String>) -> Self {
        self.descriptor.state = Some(value.into());
        self
    }

    pub fn country_code(mut self, value: impl Into<String>) -> Self {
        self.descriptor.country_code = Some(value.into());
        self
    }

    pub fn not_before(mut self, value: DateTime<Utc>) -> Self {
        self.descriptor.not_before = value;
        self
    }

    pub fn not_after(mut self, value: DateTime<Utc>) -> Self {
        self.descriptor.not_after = value;
        self
    }

    pub fn subject_alternative_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.subject_alternative_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Finishes the descriptor without validating it; see [`CertificateDescriptor::validate`].
    pub fn build(self) -> CertificateDescriptor {
        self.descriptor
    }
}

// ============================================================================
// Generators
// ============================================================================

/// Derives an impersonation certificate descriptor from observed hostnames.
pub trait CertificateDescriptorGenerator: Send + Sync {
    /// Describes a certificate covering `hostnames`.
    ///
    /// `original` is the upstream server's certificate, when known.
    fn generate(
        &self,
        hostnames: &[String],
        original: Option<&CertificateDer<'_>>,
    ) -> std::result::Result<CertificateDescriptor, ArgumentError>;
}

/// Describes a certificate from hostnames alone.
///
/// The first hostname becomes the common name and every hostname is listed
/// as a subject alternative name. The upstream certificate is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostnameCertificateInfoGenerator;

impl CertificateDescriptorGenerator for HostnameCertificateInfoGenerator {
    fn generate(
        &self,
        hostnames: &[String],
        _original: Option<&CertificateDer<'_>>,
    ) -> std::result::Result<CertificateDescriptor, ArgumentError> {
        let first = hostnames.first().ok_or(ArgumentError::EmptyHostnames)?;

        Ok(CertificateDescriptor::builder()
            .common_name(first.clone())
            .organization(IMPERSONATION_ORGANIZATION)
            .organizational_unit(IMPERSONATION_ORGANIZATIONAL_UNIT)
            .subject_alternative_names(hostnames.iter().cloned())
            .build())
    }
}

/// Copies subject, validity and alternative names from the upstream certificate.
///
/// Observed hostnames missing from the upstream SAN list are appended. Falls
/// back to [`HostnameCertificateInfoGenerator`] without a parsable upstream
/// certificate.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamCertificateInfoGenerator;

impl CertificateDescriptorGenerator for UpstreamCertificateInfoGenerator {
    fn generate(
        &self,
        hostnames: &[String],
        original: Option<&CertificateDer<'_>>,
    ) -> std::result::Result<CertificateDescriptor, ArgumentError> {
        if hostnames.is_empty() {
            return Err(ArgumentError::EmptyHostnames);
        }

        let Some(original) = original else {
            return HostnameCertificateInfoGenerator.generate(hostnames, None);
        };
        let parsed = match x509_parser::parse_x509_certificate(original.as_ref()) {
            Ok((_, parsed)) => parsed,
            Err(e) => {
                tracing::debug!("Upstream certificate unparsable, using hostnames: {}", e);
                return HostnameCertificateInfoGenerator.generate(hostnames, None);
            }
        };

        let subject = parsed.subject();

        let mut names: Vec<String> = Vec::new();
        if let Ok(Some(san)) = parsed.subject_alternative_name() {
            for general_name in &san.value.general_names {
                match general_name {
                    GeneralName::DNSName(name) => names.push(name.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            names.push(ip.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        for hostname in hostnames {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(hostname)) {
                names.push(hostname.clone());
            }
        }

        let common_name =
            first_value(subject.iter_common_name()).unwrap_or_else(|| hostnames[0].clone());

        let mut builder = CertificateDescriptor::builder()
            .common_name(common_name)
            .subject_alternative_names(names);

        let validity = parsed.validity();
        if let (Some(not_before), Some(not_after)) = (
            Utc.timestamp_opt(validity.not_before.timestamp(), 0).single(),
            Utc.timestamp_opt(validity.not_after.timestamp(), 0).single(),
        ) {
            builder = builder.not_before(not_before).not_after(not_after);
        }

        if let Some(value) = first_value(subject.iter_organization()) {
            builder = builder.organization(value);
        }
        if let Some(value) = first_value(subject.iter_organizational_unit()) {
            builder = builder.organizational_unit(value);
        }
        if let Some(value) = first_value(subject.iter_locality()) {
            builder = builder.locality(value);
        }
        if let Some(value) = first_value(subject.iter_state_or_province()) {
            builder = builder.state(value);
        }
        if let Some(value) = first_value(subject.iter_country()) {
            builder = builder.country_code(value);
        }
        if let Some(value) = first_value(subject.iter_email()) {
            builder = builder.email(value);
        }

        Ok(builder.build())
    }
}

fn first_value<'b, 'a: 'b>(
    mut attributes: impl Iterator<Item = &'b AttributeTypeAndValue<'a>>,
) -> Option<String> {
    attributes
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(std::net::IpAddr::from),
        _ => None,
    }
}
