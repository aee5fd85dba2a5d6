//! Asset types and the identity contract the core relies on.
//!
//! The concrete asset model belongs to an external collaborator. The core only
//! needs to know *what kind* of asset it is looking at (to pick a pipeline) and
//! *which* asset it is (to deduplicate work within a session).

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The closed set of asset kinds the registry can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(u8)]
pub enum AssetType {
    /// Fully qualified domain name.
    Fqdn = 0,
    /// IPv4 or IPv6 address.
    IpAddress = 1,
    /// CIDR block.
    Netblock = 2,
    /// Autonomous system number.
    AutonomousSystem = 3,
    /// Registry record describing an autonomous system.
    AutnumRecord = 4,
    /// Registration record for a domain.
    DomainRecord = 5,
    /// Organization.
    Organization = 6,
    /// Person.
    Person = 7,
    /// Email address.
    EmailAddress = 8,
    /// URL.
    Url = 9,
    /// Network service.
    Service = 10,
    /// TLS certificate.
    TlsCertificate = 11,
    /// Physical location.
    Location = 12,
    /// Phone number.
    Phone = 13,
    /// Account on some platform.
    Account = 14,
}

impl AssetType {
    /// Every known asset type, in tag order.
    pub const ALL: [AssetType; 15] = [
        AssetType::Fqdn,
        AssetType::IpAddress,
        AssetType::Netblock,
        AssetType::AutonomousSystem,
        AssetType::AutnumRecord,
        AssetType::DomainRecord,
        AssetType::Organization,
        AssetType::Person,
        AssetType::EmailAddress,
        AssetType::Url,
        AssetType::Service,
        AssetType::TlsCertificate,
        AssetType::Location,
        AssetType::Phone,
        AssetType::Account,
    ];

    /// Canonical name.
    pub const fn as_str(self) -> &'static str {
        match self {
            AssetType::Fqdn => "FQDN",
            AssetType::IpAddress => "IPAddress",
            AssetType::Netblock => "Netblock",
            AssetType::AutonomousSystem => "AutonomousSystem",
            AssetType::AutnumRecord => "AutnumRecord",
            AssetType::DomainRecord => "DomainRecord",
            AssetType::Organization => "Organization",
            AssetType::Person => "Person",
            AssetType::EmailAddress => "EmailAddress",
            AssetType::Url => "URL",
            AssetType::Service => "Service",
            AssetType::TlsCertificate => "TLSCertificate",
            AssetType::Location => "Location",
            AssetType::Phone => "Phone",
            AssetType::Account => "Account",
        }
    }

    /// Numeric tag.
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection of a raw asset type tag or name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAssetTypeError {
    /// No asset type carries this name.
    #[error("unknown asset type name: {0}")]
    UnknownName(String),
    /// The tag is outside the known range.
    #[error("asset type tag out of range: {0}")]
    UnknownTag(u8),
}

impl FromStr for AssetType {
    type Err = ParseAssetTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseAssetTypeError::UnknownName(s.to_string()))
    }
}

impl TryFrom<u8> for AssetType {
    type Error = ParseAssetTypeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        AssetType::ALL
            .get(usize::from(tag))
            .copied()
            .ok_or(ParseAssetTypeError::UnknownTag(tag))
    }
}

impl TryFrom<String> for AssetType {
    type Error = ParseAssetTypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AssetType> for String {
    fn from(t: AssetType) -> Self {
        t.as_str().to_string()
    }
}

/// A discovered entity, as far as orchestration is concerned.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug)]
/// struct Fqdn(String);
///
/// impl Asset for Fqdn {
///     fn asset_type(&self) -> AssetType { AssetType::Fqdn }
///     fn key(&self) -> String { self.0.to_lowercase() }
/// }
/// ```
pub trait Asset: fmt::Debug + Send + Sync + 'static {
    /// The kind of asset; selects the pipeline.
    fn asset_type(&self) -> AssetType;

    /// Identity within its type. Two assets with equal keys are the same asset.
    fn key(&self) -> String;

    /// The deduplication identity.
    fn asset_key(&self) -> AssetKey {
        AssetKey::new(self.asset_type(), self.key())
    }
}

/// Type-qualified asset identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    /// Kind of asset.
    pub asset_type: AssetType,
    /// Identity within the kind.
    pub key: String,
}

impl AssetKey {
    /// Create a new key.
    pub fn new(asset_type: AssetType, key: impl Into<String>) -> Self {
        Self {
            asset_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset_type, self.key)
    }
}
