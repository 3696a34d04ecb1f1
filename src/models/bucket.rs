//! The bucket resource: desired configuration, concrete configuration, and
//! the record kept in provisioning state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// State address of the managed bucket.
pub const BUCKET_ADDRESS: &str = "aws_s3_bucket.bucket";

/// Resource kind recorded next to the bucket in state.
pub const BUCKET_KIND: &str = "aws_s3_bucket";

/// Name literal the fixture bucket is created under.
pub const DEFAULT_BUCKET_PREFIX: &str = "insecure-public-bucket";

/// Canned access-control policy of a bucket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AuthenticatedRead => "authenticated-read",
        }
    }

    /// True when unauthenticated principals may read the bucket contents.
    pub fn allows_anonymous_read(&self) -> bool {
        matches!(self, Acl::PublicRead | Acl::PublicReadWrite)
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default server-side encryption algorithm applied to every object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseAlgorithm {
    #[serde(rename = "AES256")]
    Aes256,
    #[serde(rename = "aws:kms")]
    AwsKms,
}

impl SseAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SseAlgorithm::Aes256 => "AES256",
            SseAlgorithm::AwsKms => "aws:kms",
        }
    }
}

impl fmt::Display for SseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared configuration of the bucket. The final name is only known once
/// the random suffix has a value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketSpec {
    /// Literal the generated suffix is appended to.
    pub name_prefix: String,

    /// Region the bucket lives in. Changing it forces a new bucket.
    pub region: String,

    pub acl: Acl,
    pub versioning_enabled: bool,
    pub sse_algorithm: SseAlgorithm,
}

impl BucketSpec {
    /// The fixture declaration: public-read, unversioned, AES256 by default.
    ///
    /// These values are deliberately weak apart from encryption and must be
    /// declared exactly like this.
    pub fn fixture(name_prefix: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            region: region.into(),
            acl: Acl::PublicRead,
            versioning_enabled: false,
            sse_algorithm: SseAlgorithm::Aes256,
        }
    }

    /// Resolve the declaration against a concrete suffix value.
    pub fn config_for(&self, suffix: &str) -> BucketConfig {
        BucketConfig {
            name: bucket_name(&self.name_prefix, suffix),
            region: self.region.clone(),
            acl: self.acl,
            versioning_enabled: self.versioning_enabled,
            sse_algorithm: self.sse_algorithm,
        }
    }
}

/// Concrete configuration of one bucket, as the backend stores it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketConfig {
    pub name: String,
    pub region: String,
    pub acl: Acl,
    pub versioning_enabled: bool,
    pub sse_algorithm: SseAlgorithm,
}

impl BucketConfig {
    /// Attributes that cannot change without destroying the bucket.
    pub fn replace_reasons(&self, desired: &BucketConfig) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.name != desired.name {
            reasons.push("name");
        }
        if !self.region.eq_ignore_ascii_case(&desired.region) {
            reasons.push("region");
        }
        reasons
    }

    /// Attributes that differ and can be updated in place.
    pub fn in_place_diff(&self, desired: &BucketConfig) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        if self.acl != desired.acl {
            changes.push(AttributeChange::new("acl", self.acl, desired.acl));
        }
        if self.versioning_enabled != desired.versioning_enabled {
            changes.push(AttributeChange::new(
                "versioning.enabled",
                self.versioning_enabled,
                desired.versioning_enabled,
            ));
        }
        if self.sse_algorithm != desired.sse_algorithm {
            changes.push(AttributeChange::new(
                "server_side_encryption_configuration.rule.apply_server_side_encryption_by_default.sse_algorithm",
                self.sse_algorithm,
                desired.sse_algorithm,
            ));
        }
        changes
    }
}

/// One attribute moving from its current value to the declared one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: &'static str,
    pub from: String,
    pub to: String,
}

impl AttributeChange {
    fn new(attribute: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self {
            attribute,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~ {}: \"{}\" -> \"{}\"", self.attribute, self.from, self.to)
    }
}

/// A bucket as recorded in provisioning state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Identifier assigned when the bucket was created.
    pub id: Uuid,

    #[serde(flatten)]
    pub config: BucketConfig,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    pub fn arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.config.name)
    }
}

/// `{prefix}-{suffix}`.
pub fn bucket_name(prefix: &str, suffix: &str) -> String {
    format!("{}-{}", prefix, suffix)
}
