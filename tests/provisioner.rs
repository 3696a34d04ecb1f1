use chrono::Utc;
use page_fixture::{
    models::{
        bucket::{Acl, BUCKET_ADDRESS, SseAlgorithm},
        random_suffix::{RandomSuffix, RandomSuffixSpec, SUFFIX_ADDRESS},
    },
    services::{
        bucket_backend::{BackendError, BucketBackend, LocalBucketBackend},
        provisioner::{
            Action, ApplySummary, Declaration, Plan, ProvisionError, Provisioner, ResourceChange,
        },
        state_store::StateStore,
    },
};
use tempfile::TempDir;
use uuid::Uuid;

const PREFIX: &str = "insecure-public-bucket";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn state_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("state/fixture.db").display())
    }

    fn backend(&self) -> LocalBucketBackend {
        LocalBucketBackend::new(self.dir.path().join("cloud"))
    }

    async fn state(&self) -> StateStore {
        StateStore::open(&self.state_url()).await.unwrap()
    }

    async fn provisioner(&self, declaration: Declaration) -> Provisioner<LocalBucketBackend> {
        Provisioner::new(self.state().await, self.backend(), declaration)
    }

    async fn fixture(&self) -> Provisioner<LocalBucketBackend> {
        self.provisioner(Declaration::fixture(PREFIX, "us-east-1"))
            .await
    }

    async fn bucket_name(&self) -> String {
        self.state().await.bucket().await.unwrap().unwrap().config.name
    }
}

fn summary(added: usize, changed: usize, destroyed: usize) -> ApplySummary {
    ApplySummary {
        added,
        changed,
        destroyed,
    }
}

#[tokio::test]
async fn first_apply_creates_suffix_then_bucket() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;

    let plan = provisioner.plan().await.unwrap();
    assert_eq!(plan.action_for(SUFFIX_ADDRESS), &Action::Create);
    assert_eq!(plan.action_for(BUCKET_ADDRESS), &Action::Create);

    assert_eq!(provisioner.apply().await.unwrap(), summary(2, 0, 0));

    let state = fx.state().await;
    let suffix = state.suffix().await.unwrap().unwrap();
    assert_eq!(suffix.result.len(), 8);
    assert!(
        suffix
            .result
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    );

    let bucket = state.bucket().await.unwrap().unwrap();
    assert_eq!(bucket.config.name, format!("{}-{}", PREFIX, suffix.result));

    let actual = fx
        .backend()
        .read_bucket(&bucket.config.name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(actual.acl, Acl::PublicRead);
    assert!(!actual.versioning_enabled);
    assert_eq!(actual.sse_algorithm, SseAlgorithm::Aes256);
}

#[tokio::test]
async fn second_apply_is_a_fixed_point() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();
    let name = fx.bucket_name().await;

    // Fresh provisioner over the same state, as a second CLI run would be.
    let provisioner = fx.fixture().await;
    assert!(!provisioner.plan().await.unwrap().has_changes());
    assert_eq!(provisioner.apply().await.unwrap(), summary(0, 0, 0));
    assert_eq!(provisioner.apply().await.unwrap(), summary(0, 0, 0));
    assert_eq!(fx.bucket_name().await, name);
}

#[tokio::test]
async fn drift_is_corrected_in_place() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let backend = fx.backend();
    let mut drifted = backend.read_bucket(&name).await.unwrap().unwrap();
    drifted.acl = Acl::Private;
    drifted.versioning_enabled = true;
    backend.update_bucket(&drifted).await.unwrap();

    let provisioner = fx.fixture().await;
    let plan = provisioner.plan().await.unwrap();
    match plan.action_for(BUCKET_ADDRESS) {
        Action::Update(changes) => {
            let attributes: Vec<_> = changes.iter().map(|c| c.attribute).collect();
            assert_eq!(attributes, vec!["acl", "versioning.enabled"]);
        }
        other => panic!("expected in-place update, got {:?}", other),
    }
    assert_eq!(plan.action_for(SUFFIX_ADDRESS), &Action::NoOp);

    assert_eq!(provisioner.apply().await.unwrap(), summary(0, 1, 0));
    let restored = backend.read_bucket(&name).await.unwrap().unwrap();
    assert_eq!(restored.acl, Acl::PublicRead);
    assert!(!restored.versioning_enabled);
    assert_eq!(fx.bucket_name().await, name);
}

#[tokio::test]
async fn bucket_deleted_out_of_band_is_recreated_under_same_name() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();
    let name = fx.bucket_name().await;

    fx.backend().delete_bucket(&name).await.unwrap();

    let provisioner = fx.fixture().await;
    assert_eq!(
        provisioner.plan().await.unwrap().action_for(BUCKET_ADDRESS),
        &Action::Create
    );
    assert_eq!(provisioner.apply().await.unwrap(), summary(1, 0, 0));
    assert_eq!(fx.bucket_name().await, name);
    assert!(fx.backend().read_bucket(&name).await.unwrap().is_some());
}

#[tokio::test]
async fn tampered_suffix_replaces_bucket() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();
    let old_name = fx.bucket_name().await;

    let state = fx.state().await;
    let mut suffix = state.suffix().await.unwrap().unwrap();
    suffix.result = if suffix.result == "zzzzzzzz" {
        "yyyyyyyy".into()
    } else {
        "zzzzzzzz".into()
    };
    state.put_suffix(&suffix).await.unwrap();

    let provisioner = fx.fixture().await;
    let plan = provisioner.plan().await.unwrap();
    assert_eq!(plan.action_for(SUFFIX_ADDRESS), &Action::NoOp);
    assert_eq!(
        plan.action_for(BUCKET_ADDRESS),
        &Action::Replace(vec!["name"])
    );

    assert_eq!(provisioner.apply().await.unwrap(), summary(1, 0, 1));
    let new_name = fx.bucket_name().await;
    assert_eq!(new_name, format!("{}-{}", PREFIX, suffix.result));
    assert!(fx.backend().read_bucket(&old_name).await.unwrap().is_none());
    assert!(fx.backend().read_bucket(&new_name).await.unwrap().is_some());
}

#[tokio::test]
async fn invalid_recorded_suffix_is_regenerated() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();

    let state = fx.state().await;
    let mut suffix = state.suffix().await.unwrap().unwrap();
    suffix.result = "NOT-VALID".into();
    state.put_suffix(&suffix).await.unwrap();

    let provisioner = fx.fixture().await;
    let plan = provisioner.plan().await.unwrap();
    assert_eq!(
        plan.action_for(SUFFIX_ADDRESS),
        &Action::Replace(vec!["result"])
    );
    assert_eq!(provisioner.apply().await.unwrap(), summary(2, 0, 2));

    let regenerated = fx.state().await.suffix().await.unwrap().unwrap();
    assert!(RandomSuffixSpec::default().satisfies(&regenerated.result));
}

#[tokio::test]
async fn changed_generator_settings_force_new_suffix_and_bucket() {
    let fx = Fixture::new();
    fx.fixture().await.apply().await.unwrap();
    let old_name = fx.bucket_name().await;

    let mut declaration = Declaration::fixture(PREFIX, "us-east-1");
    declaration.suffix.length = 12;
    let provisioner = fx.provisioner(declaration).await;

    let plan = provisioner.plan().await.unwrap();
    assert_eq!(
        plan.action_for(SUFFIX_ADDRESS),
        &Action::Replace(vec!["length"])
    );
    assert_eq!(
        plan.action_for(BUCKET_ADDRESS),
        &Action::Replace(vec!["name"])
    );

    assert_eq!(provisioner.apply().await.unwrap(), summary(2, 0, 2));
    let new_name = fx.bucket_name().await;
    assert_eq!(new_name.len(), PREFIX.len() + 1 + 12);
    assert!(fx.backend().read_bucket(&old_name).await.unwrap().is_none());
    assert_eq!(provisioner.apply().await.unwrap(), summary(0, 0, 0));
}

#[tokio::test]
async fn destroy_removes_everything_in_reverse_order() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;
    provisioner.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let plan = provisioner.plan_destroy().await.unwrap();
    let addresses: Vec<_> = plan.changes.iter().map(|c| c.address).collect();
    assert_eq!(addresses, vec![BUCKET_ADDRESS, SUFFIX_ADDRESS]);

    assert_eq!(provisioner.destroy().await.unwrap(), summary(0, 0, 2));
    assert!(fx.backend().read_bucket(&name).await.unwrap().is_none());
    assert!(fx.state().await.addresses().await.unwrap().is_empty());
    assert_eq!(provisioner.destroy().await.unwrap(), summary(0, 0, 0));
    assert_eq!(provisioner.outputs().await.unwrap().bucket_name, None);
}

#[tokio::test]
async fn naming_collision_fails_without_recording_bucket() {
    let fx = Fixture::new();
    let state = fx.state().await;
    let suffix = RandomSuffix {
        id: Uuid::new_v4(),
        result: "taken000".into(),
        spec: RandomSuffixSpec::default(),
        created_at: Utc::now(),
    };
    state.put_suffix(&suffix).await.unwrap();

    let declaration = Declaration::fixture(PREFIX, "us-east-1");
    fx.backend()
        .create_bucket(&declaration.bucket.config_for("taken000"))
        .await
        .unwrap();

    let err = fx.provisioner(declaration).await.apply().await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Backend(BackendError::BucketAlreadyExists(_))
    ));
    assert!(fx.state().await.bucket().await.unwrap().is_none());
    assert_eq!(fx.state().await.suffix().await.unwrap(), Some(suffix));
}

#[tokio::test]
async fn rejected_region_records_suffix_but_no_bucket() {
    let fx = Fixture::new();
    let provisioner = fx
        .provisioner(Declaration::fixture(PREFIX, "mars-north-1"))
        .await;

    let err = provisioner.apply().await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Backend(BackendError::UnsupportedRegion(_))
    ));
    let state = fx.state().await;
    assert!(state.bucket().await.unwrap().is_none());
    assert!(state.suffix().await.unwrap().is_some());
    assert_eq!(
        state.addresses().await.unwrap(),
        vec![SUFFIX_ADDRESS.to_string()]
    );
}

#[tokio::test]
async fn outputs_expose_name_and_arn() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;
    provisioner.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let outputs = provisioner.outputs().await.unwrap();
    assert_eq!(outputs.bucket_name.as_deref(), Some(name.as_str()));
    assert_eq!(outputs.bucket_arn, Some(format!("arn:aws:s3:::{}", name)));
}

#[tokio::test]
async fn executing_destroy_plan_removes_resources() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;
    provisioner.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let plan = provisioner.plan_destroy().await.unwrap();
    assert_eq!(provisioner.execute(&plan).await.unwrap(), summary(0, 0, 2));

    assert!(fx.backend().read_bucket(&name).await.unwrap().is_none());
    assert!(fx.state().await.addresses().await.unwrap().is_empty());
    assert_eq!(provisioner.outputs().await.unwrap().bucket_name, None);

    // The same plan again finds nothing left to delete.
    assert_eq!(provisioner.execute(&plan).await.unwrap(), summary(0, 0, 0));
}

#[tokio::test]
async fn bucket_only_delete_keeps_suffix() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;
    provisioner.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let plan = Plan {
        changes: vec![ResourceChange {
            address: BUCKET_ADDRESS,
            action: Action::Delete,
        }],
    };
    assert_eq!(provisioner.execute(&plan).await.unwrap(), summary(0, 0, 1));
    assert!(fx.backend().read_bucket(&name).await.unwrap().is_none());
    assert!(fx.state().await.suffix().await.unwrap().is_some());

    // Next apply recreates the bucket under the pinned name.
    assert_eq!(provisioner.apply().await.unwrap(), summary(1, 0, 0));
    assert_eq!(fx.bucket_name().await, name);
}

#[tokio::test]
async fn suffix_delete_under_live_bucket_is_refused() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;
    provisioner.apply().await.unwrap();
    let name = fx.bucket_name().await;

    let plan = Plan {
        changes: vec![ResourceChange {
            address: SUFFIX_ADDRESS,
            action: Action::Delete,
        }],
    };
    let err = provisioner.execute(&plan).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::DependentStillPresent {
            address: SUFFIX_ADDRESS,
            dependent: BUCKET_ADDRESS,
        }
    ));
    assert!(fx.backend().read_bucket(&name).await.unwrap().is_some());
    assert_eq!(fx.state().await.addresses().await.unwrap().len(), 2);
}

#[tokio::test]
async fn deletes_cannot_be_mixed_with_other_changes() {
    let fx = Fixture::new();
    let provisioner = fx.fixture().await;

    let plan = Plan {
        changes: vec![
            ResourceChange {
                address: SUFFIX_ADDRESS,
                action: Action::Create,
            },
            ResourceChange {
                address: BUCKET_ADDRESS,
                action: Action::Delete,
            },
        ],
    };
    let err = provisioner.execute(&plan).await.unwrap_err();
    assert!(matches!(err, ProvisionError::MixedPlan(SUFFIX_ADDRESS)));
    assert!(fx.state().await.addresses().await.unwrap().is_empty());
}
