use page_fixture::services::image_contract::{self, ImageContract, ImageError, Violation};
use std::path::{Path, PathBuf};

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// A copy of the shipped build context in a scratch directory.
fn scratch_context() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = repo_root();
    std::fs::copy(root.join("Dockerfile"), dir.path().join("Dockerfile")).unwrap();
    std::fs::copy(root.join("Cargo.toml"), dir.path().join("Cargo.toml")).unwrap();
    for sub in ["src", "migrations", "static"] {
        std::fs::create_dir_all(dir.path().join(sub)).unwrap();
    }
    std::fs::copy(
        root.join("static/index.html"),
        dir.path().join("static/index.html"),
    )
    .unwrap();
    dir
}

fn dockerfile(dir: &Path) -> PathBuf {
    dir.join("Dockerfile")
}

#[test]
fn shipped_dockerfile_satisfies_contract() {
    let root = repo_root();
    let plan = image_contract::check(&ImageContract::default(), &root, &dockerfile(&root)).unwrap();

    assert_eq!(plan.cmd, Some(vec!["/app/page-fixture".to_string()]));
    assert_eq!(plan.exposed_ports, vec!["5000"]);
    assert_eq!(plan.workdir.as_deref(), Some("/app"));
    assert_eq!(plan.copied_names(), vec!["page-fixture", "index.html"]);
}

#[test]
fn missing_document_fails_check() {
    let dir = scratch_context();
    std::fs::remove_file(dir.path().join("static/index.html")).unwrap();

    let err = image_contract::check(
        &ImageContract::default(),
        dir.path(),
        &dockerfile(dir.path()),
    )
    .unwrap_err();
    match err {
        ImageError::Contract(violations) => assert_eq!(
            violations,
            vec![Violation::MissingSource(PathBuf::from("static/index.html"))]
        ),
        other => panic!("expected contract violation, got {other}"),
    }
}

#[test]
fn missing_dockerfile_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = image_contract::check(
        &ImageContract::default(),
        dir.path(),
        &dockerfile(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, ImageError::Read { .. }));
}

#[tokio::test]
async fn failed_check_never_starts_builder() {
    let dir = scratch_context();
    std::fs::remove_file(dir.path().join("static/index.html")).unwrap();

    // A builder that does not exist would surface as `Spawn` if it were run.
    let err = image_contract::build(
        &ImageContract::default(),
        dir.path(),
        &dockerfile(dir.path()),
        "page-fixture:test",
        "/nonexistent/image-builder",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ImageError::Contract(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn builder_failure_propagates() {
    let dir = scratch_context();

    let err = image_contract::build(
        &ImageContract::default(),
        dir.path(),
        &dockerfile(dir.path()),
        "page-fixture:test",
        "false",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ImageError::BuildFailed { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn successful_builder_returns_plan() {
    let dir = scratch_context();

    let plan = image_contract::build(
        &ImageContract::default(),
        dir.path(),
        &dockerfile(dir.path()),
        "page-fixture:test",
        "true",
    )
    .await
    .unwrap();
    assert_eq!(plan.base_image, "debian:bookworm-slim");
}
