//! The random suffix resource. Its value is drawn once, pinned in state and
//! read back on every later plan, so the bucket name built from it is stable.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// State address of the suffix generator.
pub const SUFFIX_ADDRESS: &str = "random_string.random_suffix";

/// Resource kind recorded next to the suffix in state.
pub const SUFFIX_KIND: &str = "random_string";

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const NUMERIC: &str = "0123456789";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SPECIAL: &str = "!@#$%&*()-_=+[]{}<>:?";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SuffixSpecError {
    #[error("suffix length must be at least 1")]
    ZeroLength,
    #[error("suffix character set is empty")]
    EmptyCharset,
}

/// Generator settings. Every field is replace-only: changing any of them
/// discards the stored value and draws a new one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RandomSuffixSpec {
    pub length: usize,
    pub special: bool,
    pub upper: bool,
    pub lower: bool,
    pub numeric: bool,
}

impl Default for RandomSuffixSpec {
    /// `length = 8, special = false, upper = false`.
    fn default() -> Self {
        Self {
            length: 8,
            special: false,
            upper: false,
            lower: true,
            numeric: true,
        }
    }
}

impl RandomSuffixSpec {
    pub fn charset(&self) -> Vec<char> {
        let mut charset = String::new();
        if self.lower {
            charset.push_str(LOWER);
        }
        if self.numeric {
            charset.push_str(NUMERIC);
        }
        if self.upper {
            charset.push_str(UPPER);
        }
        if self.special {
            charset.push_str(SPECIAL);
        }
        charset.chars().collect()
    }

    pub fn validate(&self) -> Result<(), SuffixSpecError> {
        if self.length == 0 {
            return Err(SuffixSpecError::ZeroLength);
        }
        if self.charset().is_empty() {
            return Err(SuffixSpecError::EmptyCharset);
        }
        Ok(())
    }

    /// Draw a fresh value. Only the provisioner calls this, and only when the
    /// resource is created or replaced.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String, SuffixSpecError> {
        self.validate()?;
        let charset = self.charset();
        Ok((0..self.length)
            .map(|_| charset[rng.random_range(0..charset.len())])
            .collect())
    }

    /// Whether `value` could have been produced by these settings.
    pub fn satisfies(&self, value: &str) -> bool {
        let charset = self.charset();
        value.chars().count() == self.length && value.chars().all(|c| charset.contains(&c))
    }

    /// Settings that differ from `desired`.
    pub fn replace_reasons(&self, desired: &RandomSuffixSpec) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.length != desired.length {
            reasons.push("length");
        }
        if self.special != desired.special {
            reasons.push("special");
        }
        if self.upper != desired.upper {
            reasons.push("upper");
        }
        if self.lower != desired.lower {
            reasons.push("lower");
        }
        if self.numeric != desired.numeric {
            reasons.push("numeric");
        }
        reasons
    }
}

/// The suffix as recorded in provisioning state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RandomSuffix {
    pub id: Uuid,

    /// The generated value.
    pub result: String,

    /// Settings the value was generated with.
    #[serde(flatten)]
    pub spec: RandomSuffixSpec,

    pub created_at: DateTime<Utc>,
}
