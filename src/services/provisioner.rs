//! src/services/provisioner.rs
//!
//! Provisioner: declarative reconciliation of the two fixture resources.
//!
//! `plan` refreshes recorded state against the backend and diffs it with the
//! declaration; `apply` executes a plan in dependency order (suffix before
//! bucket, since the bucket name is built from the suffix); `destroy` tears
//! down in reverse order. State is written after every resource operation
//! that succeeds, so a failure part-way leaves state describing exactly what
//! exists.

use crate::{
    models::{
        bucket::{AttributeChange, BUCKET_ADDRESS, Bucket, BucketSpec},
        random_suffix::{RandomSuffix, RandomSuffixSpec, SUFFIX_ADDRESS, SuffixSpecError},
    },
    services::{
        bucket_backend::{BackendError, BucketBackend},
        state_store::{StateError, StateStore},
    },
};
use chrono::Utc;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Suffix(#[from] SuffixSpecError),
    #[error("`{0}` has no value in state")]
    MissingDependency(&'static str),
    #[error("`{address}` cannot be deleted while `{dependent}` is recorded")]
    DependentStillPresent {
        address: &'static str,
        dependent: &'static str,
    },
    #[error("plan deletes a resource while changing `{0}`")]
    MixedPlan(&'static str),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Desired state of the whole unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub suffix: RandomSuffixSpec,
    pub bucket: BucketSpec,
}

impl Declaration {
    /// An 8-character lowercase suffix and a public-read, unversioned,
    /// AES256-encrypted bucket named `{prefix}-{suffix}`.
    pub fn fixture(name_prefix: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            suffix: RandomSuffixSpec::default(),
            bucket: BucketSpec::fixture(name_prefix, region),
        }
    }
}

/// What reconciliation will do to one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    NoOp,
    Create,
    Update(Vec<AttributeChange>),
    /// Destroy and recreate; carries the attributes that forced it.
    Replace(Vec<&'static str>),
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceChange {
    pub address: &'static str,
    pub action: Action,
}

impl fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Action::NoOp => write!(f, "    {} is up to date", self.address),
            Action::Create => write!(f, "  + {} will be created", self.address),
            Action::Update(changes) => {
                write!(f, "  ~ {} will be updated in-place", self.address)?;
                for change in changes {
                    write!(f, "\n      {}", change)?;
                }
                Ok(())
            }
            Action::Replace(reasons) => write!(
                f,
                "-/+ {} must be replaced ({} forces replacement)",
                self.address,
                reasons.join(", ")
            ),
            Action::Delete => write!(f, "  - {} will be destroyed", self.address),
        }
    }
}

/// Counts of resource operations, for plans and for completed runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

impl ApplySummary {
    fn record(&mut self, action: &Action) {
        match action {
            Action::NoOp => {}
            Action::Create => self.added += 1,
            Action::Update(_) => self.changed += 1,
            Action::Replace(_) => {
                self.added += 1;
                self.destroyed += 1;
            }
            Action::Delete => self.destroyed += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resources: {} added, {} changed, {} destroyed.",
            self.added, self.changed, self.destroyed
        )
    }
}

/// Ordered resource changes, dependencies first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub changes: Vec<ResourceChange>,
}

impl Plan {
    pub fn action_for(&self, address: &str) -> &Action {
        self.changes
            .iter()
            .find(|change| change.address == address)
            .map(|change| &change.action)
            .unwrap_or(&Action::NoOp)
    }

    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for change in &self.changes {
            summary.record(&change.action);
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        !self.summary().is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return write!(
                f,
                "No changes. Infrastructure matches the configuration."
            );
        }
        for change in self.changes.iter().filter(|c| c.action != Action::NoOp) {
            writeln!(f, "{}", change)?;
        }
        let summary = self.summary();
        write!(
            f,
            "\nPlan: {} to add, {} to change, {} to destroy.",
            summary.added, summary.changed, summary.destroyed
        )
    }
}

/// Values exported from state after an apply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outputs {
    pub bucket_name: Option<String>,
    pub bucket_arn: Option<String>,
}

/// Reconciles a `Declaration` against recorded state and a bucket backend.
pub struct Provisioner<B> {
    state: StateStore,
    backend: B,
    declaration: Declaration,
}

impl<B: BucketBackend> Provisioner<B> {
    pub fn new(state: StateStore, backend: B, declaration: Declaration) -> Self {
        Self {
            state,
            backend,
            declaration,
        }
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    /// Refresh and diff. Never mutates state or the backend.
    pub async fn plan(&self) -> ProvisionResult<Plan> {
        let suffix = self.state.suffix().await?;
        let suffix_action = self.plan_suffix(suffix.as_ref());
        let bucket = self.state.bucket().await?;
        let bucket_action = self
            .plan_bucket(suffix.as_ref(), &suffix_action, bucket.as_ref())
            .await?;

        Ok(Plan {
            changes: vec![
                ResourceChange {
                    address: SUFFIX_ADDRESS,
                    action: suffix_action,
                },
                ResourceChange {
                    address: BUCKET_ADDRESS,
                    action: bucket_action,
                },
            ],
        })
    }

    /// Plan removal of everything recorded, bucket first.
    pub async fn plan_destroy(&self) -> ProvisionResult<Plan> {
        let mut changes = Vec::new();
        if self.state.bucket().await?.is_some() {
            changes.push(ResourceChange {
                address: BUCKET_ADDRESS,
                action: Action::Delete,
            });
        }
        if self.state.suffix().await?.is_some() {
            changes.push(ResourceChange {
                address: SUFFIX_ADDRESS,
                action: Action::Delete,
            });
        }
        Ok(Plan { changes })
    }

    /// Plan, then execute.
    pub async fn apply(&self) -> ProvisionResult<ApplySummary> {
        let plan = self.plan().await?;
        self.execute(&plan).await
    }

    /// Execute a plan produced by `plan` or `plan_destroy`. Only operations
    /// that actually ran are counted in the returned summary.
    pub async fn execute(&self, plan: &Plan) -> ProvisionResult<ApplySummary> {
        let suffix_action = plan.action_for(SUFFIX_ADDRESS);
        let bucket_action = plan.action_for(BUCKET_ADDRESS);

        if *suffix_action == Action::Delete || *bucket_action == Action::Delete {
            return self.execute_deletes(suffix_action, bucket_action).await;
        }
        if !plan.has_changes() {
            info!("no changes to apply");
            return Ok(ApplySummary::default());
        }

        let mut summary = ApplySummary::default();

        let suffix = match suffix_action {
            Action::Create | Action::Replace(_) => {
                let record = RandomSuffix {
                    id: Uuid::new_v4(),
                    result: self.declaration.suffix.generate(&mut rand::rng())?,
                    spec: self.declaration.suffix.clone(),
                    created_at: Utc::now(),
                };
                self.state.put_suffix(&record).await?;
                info!("{}: generated new suffix {}", SUFFIX_ADDRESS, record.result);
                summary.record(suffix_action);
                record
            }
            _ => self
                .state
                .suffix()
                .await?
                .ok_or(ProvisionError::MissingDependency(SUFFIX_ADDRESS))?,
        };

        let desired = self.declaration.bucket.config_for(&suffix.result);
        match bucket_action {
            // Deletions were routed to `execute_deletes` above.
            Action::NoOp | Action::Delete => {}
            Action::Create => {
                self.backend.create_bucket(&desired).await?;
                let record = Bucket {
                    id: Uuid::new_v4(),
                    config: desired,
                    created_at: Utc::now(),
                };
                self.state.put_bucket(&record).await?;
                summary.record(bucket_action);
                info!("{}: created {}", BUCKET_ADDRESS, record.config.name);
            }
            Action::Update(changes) => {
                let mut record = self
                    .state
                    .bucket()
                    .await?
                    .ok_or(ProvisionError::MissingDependency(BUCKET_ADDRESS))?;
                self.backend.update_bucket(&desired).await?;
                record.config = desired;
                self.state.put_bucket(&record).await?;
                summary.record(bucket_action);
                for change in changes {
                    info!("{}: {}", BUCKET_ADDRESS, change);
                }
            }
            Action::Replace(reasons) => {
                if let Some(old) = self.state.bucket().await? {
                    self.delete_bucket(&old).await?;
                }
                self.backend.create_bucket(&desired).await?;
                let record = Bucket {
                    id: Uuid::new_v4(),
                    config: desired,
                    created_at: Utc::now(),
                };
                self.state.put_bucket(&record).await?;
                summary.record(bucket_action);
                info!(
                    "{}: replaced with {} ({})",
                    BUCKET_ADDRESS,
                    record.config.name,
                    reasons.join(", ")
                );
            }
        }

        if self.declaration.bucket.acl.allows_anonymous_read() {
            warn!(
                "{} grants anonymous read access (acl={})",
                bucket_name_or_pending(&self.state).await?,
                self.declaration.bucket.acl
            );
        }

        info!("apply complete: {}", summary);
        Ok(summary)
    }

    /// Remove the bucket, then the suffix.
    pub async fn destroy(&self) -> ProvisionResult<ApplySummary> {
        let plan = self.plan_destroy().await?;
        let summary = self.execute(&plan).await?;
        info!("destroy complete: {}", summary);
        Ok(summary)
    }

    /// Deletions run dependents first. A plan may not delete one resource
    /// while changing the other, and the suffix may only go once no bucket is
    /// recorded against it.
    async fn execute_deletes(
        &self,
        suffix_action: &Action,
        bucket_action: &Action,
    ) -> ProvisionResult<ApplySummary> {
        for (address, action) in [
            (SUFFIX_ADDRESS, suffix_action),
            (BUCKET_ADDRESS, bucket_action),
        ] {
            if !matches!(action, Action::NoOp | Action::Delete) {
                return Err(ProvisionError::MixedPlan(address));
            }
        }
        if *suffix_action == Action::Delete
            && *bucket_action != Action::Delete
            && self.state.bucket().await?.is_some()
        {
            return Err(ProvisionError::DependentStillPresent {
                address: SUFFIX_ADDRESS,
                dependent: BUCKET_ADDRESS,
            });
        }

        let mut summary = ApplySummary::default();

        if *bucket_action == Action::Delete {
            if let Some(bucket) = self.state.bucket().await? {
                self.delete_bucket(&bucket).await?;
                summary.record(bucket_action);
                info!("{}: destroyed {}", BUCKET_ADDRESS, bucket.config.name);
            }
        }

        if *suffix_action == Action::Delete && self.state.remove(SUFFIX_ADDRESS).await? {
            summary.record(suffix_action);
            info!("{}: destroyed", SUFFIX_ADDRESS);
        }

        Ok(summary)
    }

    pub async fn outputs(&self) -> ProvisionResult<Outputs> {
        Ok(self
            .state
            .bucket()
            .await?
            .map(|bucket| Outputs {
                bucket_arn: Some(bucket.arn()),
                bucket_name: Some(bucket.config.name),
            })
            .unwrap_or_default())
    }

    fn plan_suffix(&self, recorded: Option<&RandomSuffix>) -> Action {
        let Some(recorded) = recorded else {
            return Action::Create;
        };

        let mut reasons = recorded.spec.replace_reasons(&self.declaration.suffix);
        if reasons.is_empty() && !recorded.spec.satisfies(&recorded.result) {
            warn!(
                "{}: recorded value does not match its own settings",
                SUFFIX_ADDRESS
            );
            reasons.push("result");
        }

        if reasons.is_empty() {
            Action::NoOp
        } else {
            Action::Replace(reasons)
        }
    }

    async fn plan_bucket(
        &self,
        suffix: Option<&RandomSuffix>,
        suffix_action: &Action,
        recorded: Option<&Bucket>,
    ) -> ProvisionResult<Action> {
        let Some(recorded) = recorded else {
            return Ok(Action::Create);
        };

        let Some(actual) = self.backend.read_bucket(&recorded.config.name).await? else {
            warn!(
                "{}: {} is recorded but no longer exists; it will be created",
                BUCKET_ADDRESS, recorded.config.name
            );
            return Ok(Action::Create);
        };

        // A suffix that is about to change makes the bucket name unknown
        // until apply.
        let suffix = match (suffix, suffix_action) {
            (Some(suffix), Action::NoOp) => suffix,
            _ => return Ok(Action::Replace(vec!["name"])),
        };

        let desired = self.declaration.bucket.config_for(&suffix.result);
        let mut reasons = recorded.config.replace_reasons(&desired);
        for reason in actual.replace_reasons(&desired) {
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }
        if !reasons.is_empty() {
            return Ok(Action::Replace(reasons));
        }

        let changes = actual.in_place_diff(&desired);
        if changes.is_empty() {
            Ok(Action::NoOp)
        } else {
            Ok(Action::Update(changes))
        }
    }

    /// Delete a recorded bucket and forget it. A bucket that is already gone
    /// is only forgotten.
    async fn delete_bucket(&self, bucket: &Bucket) -> ProvisionResult<()> {
        match self.backend.delete_bucket(&bucket.config.name).await {
            Ok(()) => {}
            Err(BackendError::BucketNotFound(name)) => {
                warn!("{}: {} was already gone", BUCKET_ADDRESS, name);
            }
            Err(err) => return Err(err.into()),
        }
        self.state.remove(BUCKET_ADDRESS).await?;
        Ok(())
    }
}

async fn bucket_name_or_pending(state: &StateStore) -> ProvisionResult<String> {
    Ok(state
        .bucket()
        .await?
        .map(|bucket| bucket.config.name)
        .unwrap_or_else(|| BUCKET_ADDRESS.to_string()))
}
