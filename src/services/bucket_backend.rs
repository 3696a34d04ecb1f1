//! src/services/bucket_backend.rs
//!
//! The cloud side of provisioning. `BucketBackend` is the seam the
//! provisioner talks to; `LocalBucketBackend` implements it on local disk,
//! one directory per bucket under `base_path/{bucket}` with the bucket's
//! configuration in `base_path/{bucket}/.bucket.json`.

use crate::models::bucket::BucketConfig;
use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("configuration of bucket `{name}` is unreadable: {source}")]
    CorruptConfig {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Bucket operations the provisioner needs from a storage provider.
///
/// Implementations must leave nothing behind when `create_bucket` fails.
#[async_trait]
pub trait BucketBackend: Send + Sync {
    async fn create_bucket(&self, config: &BucketConfig) -> BackendResult<()>;

    /// Current configuration, or `None` when the bucket does not exist.
    async fn read_bucket(&self, name: &str) -> BackendResult<Option<BucketConfig>>;

    /// Overwrite the mutable settings of an existing bucket.
    async fn update_bucket(&self, config: &BucketConfig) -> BackendResult<()>;

    async fn delete_bucket(&self, name: &str) -> BackendResult<()>;
}

const CONFIG_FILE: &str = ".bucket.json";
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 15] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Buckets as directories on local disk.
#[derive(Clone, Debug)]
pub struct LocalBucketBackend {
    /// Directory holding one subdirectory per bucket.
    pub base_path: PathBuf,
}

impl LocalBucketBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn bucket_root(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.bucket_root(name).join(CONFIG_FILE)
    }

    /// Write the configuration through a temp file and rename it into place,
    /// so readers never see a partial file.
    async fn write_config(&self, config: &BucketConfig) -> BackendResult<()> {
        let root = self.bucket_root(&config.name);
        let tmp_path = root.join(format!(".tmp-{}", Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(config).map_err(|source| {
            BackendError::CorruptConfig {
                name: config.name.clone(),
                source,
            }
        })?;

        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(&json).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, self.config_path(&config.name)).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }
        Ok(())
    }
}

#[async_trait]
impl BucketBackend for LocalBucketBackend {
    async fn create_bucket(&self, config: &BucketConfig) -> BackendResult<()> {
        ensure_bucket_name_safe(&config.name)?;
        ensure_region_valid(&config.region)?;
        fs::create_dir_all(&self.base_path).await?;

        let root = self.bucket_root(&config.name);
        match fs::create_dir(&root).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::BucketAlreadyExists(config.name.clone()));
            }
            Err(err) => return Err(BackendError::Io(err)),
        }

        if let Err(err) = self.write_config(config).await {
            if let Err(cleanup) = fs::remove_dir_all(&root).await {
                debug!(
                    "failed to remove half-created bucket {}: {}",
                    root.display(),
                    cleanup
                );
            }
            return Err(err);
        }

        debug!("created bucket directory {}", root.display());
        Ok(())
    }

    async fn read_bucket(&self, name: &str) -> BackendResult<Option<BucketConfig>> {
        ensure_bucket_name_safe(name)?;
        let raw = match fs::read(self.config_path(name)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BackendError::Io(err)),
        };
        let config = serde_json::from_slice(&raw).map_err(|source| BackendError::CorruptConfig {
            name: name.to_string(),
            source,
        })?;
        Ok(Some(config))
    }

    async fn update_bucket(&self, config: &BucketConfig) -> BackendResult<()> {
        ensure_bucket_name_safe(&config.name)?;
        ensure_region_valid(&config.region)?;
        if !is_present(&self.config_path(&config.name)).await? {
            return Err(BackendError::BucketNotFound(config.name.clone()));
        }
        self.write_config(config).await
    }

    async fn delete_bucket(&self, name: &str) -> BackendResult<()> {
        ensure_bucket_name_safe(name)?;
        let root = self.bucket_root(name);
        match fs::remove_dir_all(&root).await {
            Ok(()) => {
                debug!("removed bucket directory {}", root.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::BucketNotFound(name.to_string()))
            }
            Err(err) => Err(BackendError::Io(err)),
        }
    }
}

async fn is_present(path: &Path) -> io::Result<bool> {
    fs::try_exists(path).await
}

/// Validate bucket name format.
///
/// Enforces S3 naming rules:
/// - 3 to 63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> BackendResult<()> {
    let invalid = |reason: &str| BackendError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Case-insensitive check against SUPPORTED_REGIONS.
fn ensure_region_valid(region: &str) -> BackendResult<()> {
    if SUPPORTED_REGIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(region))
    {
        Ok(())
    } else {
        Err(BackendError::UnsupportedRegion(region.to_string()))
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
