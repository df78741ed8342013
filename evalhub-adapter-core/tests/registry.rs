use evalhub_adapter_core::domain::OCIArtifactSpec;
use evalhub_adapter_core::logging::{BufferedEventLogger, NoopEventLogger};
use evalhub_adapter_core::persister::{ArtifactPersister, PersistError, EMPTY_SET_DIGEST};
use evalhub_adapter_core::persisters::RegistryPersister;
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use std::path::PathBuf;
use std::sync::Arc;

const REPO: &str = "/v2/eval-results/mmlu";

fn write_results(dir: &std::path::Path) -> Vec<PathBuf> {
    let a = dir.join("results.json");
    let b = dir.join("summary.txt");
    std::fs::write(&a, r#"{"accuracy":0.85}"#).unwrap();
    std::fs::write(&b, "accuracy: 0.85\n").unwrap();
    vec![a, b]
}

#[tokio::test]
async fn pushes_blobs_and_manifest() {
    let server = MockServer::start_async().await;
    let start = server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{REPO}/blobs/uploads/"));
            then.status(202)
                .header("Location", format!("{REPO}/blobs/uploads/session-1"));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{REPO}/blobs/uploads/session-1"))
                .query_param_exists("digest");
            then.status(201);
        })
        .await;
    let manifest = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{REPO}/manifests/eval-001"))
                .header("content-type", "application/vnd.oci.image.manifest.v1+json")
                .body_contains(r#""org.opencontainers.image.title":"results.json""#)
                .body_contains(r#""org.opencontainers.image.title":"summary.txt""#)
                .body_contains(r#""io.evalhub.job-id":"eval-001""#);
            then.status(201);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let logger = Arc::new(BufferedEventLogger::default());
    let persister =
        RegistryPersister::new(&server.base_url(), None, None, true, logger.clone()).unwrap();
    let spec = OCIArtifactSpec::new(write_results(dir.path()), "eval-001", "mmlu", "test-model");
    let result = persister.persist(&spec).await.unwrap();

    start.assert_hits_async(3).await;
    upload.assert_hits_async(3).await;
    manifest.assert_hits_async(1).await;

    assert!(result.digest.starts_with("sha256:"));
    assert_ne!(result.digest, EMPTY_SET_DIGEST);
    assert_eq!(
        result.reference,
        format!("{}/eval-results/mmlu:eval-001@{}", server.address(), result.digest)
    );
    assert_eq!(result.size_bytes, 17 + 15);
    assert!(logger
        .messages()
        .contains(&"artifact.push.done".to_string()));
}

#[tokio::test]
async fn pushes_into_registry_namespace() {
    let server = MockServer::start_async().await;
    let ns_repo = "/v2/myorg/eval-results/mmlu";
    let start = server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{ns_repo}/blobs/uploads/"));
            then.status(202)
                .header("Location", format!("{ns_repo}/blobs/uploads/session-1"));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{ns_repo}/blobs/uploads/session-1"))
                .query_param_exists("digest");
            then.status(201);
        })
        .await;
    let manifest = server
        .mock_async(|when, then| {
            when.method(PUT).path(format!("{ns_repo}/manifests/eval-001"));
            then.status(201);
        })
        .await;
    let unqualified = server
        .mock_async(|when, then| {
            when.path_contains(REPO);
            then.status(404);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let registry_url = format!("{}/myorg/", server.base_url());
    let persister =
        RegistryPersister::new(&registry_url, None, None, true, Arc::new(NoopEventLogger))
            .unwrap();
    let spec = OCIArtifactSpec::new(write_results(dir.path()), "eval-001", "mmlu", "test-model");
    let result = persister.persist(&spec).await.unwrap();

    start.assert_hits_async(3).await;
    upload.assert_hits_async(3).await;
    manifest.assert_hits_async(1).await;
    unqualified.assert_hits_async(0).await;
    assert_eq!(
        result.reference,
        format!("{}/myorg/eval-results/mmlu:eval-001@{}", server.address(), result.digest)
    );
}

#[tokio::test]
async fn existing_blobs_are_not_uploaded_again() {
    let server = MockServer::start_async().await;
    let head = server
        .mock_async(|when, then| {
            when.method(HEAD).path_contains(format!("{REPO}/blobs/sha256:"));
            then.status(200);
        })
        .await;
    let start = server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{REPO}/blobs/uploads/"));
            then.status(202).header("Location", "/unused");
        })
        .await;
    let manifest = server
        .mock_async(|when, then| {
            when.method(PUT).path(format!("{REPO}/manifests/eval-001"));
            then.status(201);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let persister =
        RegistryPersister::new(&server.base_url(), None, None, true, Arc::new(NoopEventLogger))
            .unwrap();
    let spec = OCIArtifactSpec::new(write_results(dir.path()), "eval-001", "mmlu", "test-model");
    persister.persist(&spec).await.unwrap();

    head.assert_hits_async(3).await;
    start.assert_hits_async(0).await;
    manifest.assert_hits_async(1).await;
}

#[tokio::test]
async fn answers_bearer_challenge_once() {
    let server = MockServer::start_async().await;
    let challenge = format!(
        r#"Bearer realm="{}",service="registry.test",scope="repository:eval-results/mmlu:pull,push""#,
        server.url("/token")
    );
    let unauthorized = server
        .mock_async(|when, then| {
            when.path_contains("/v2/")
                .header("authorization", "Basic dXNlcjpzZWNyZXQ=");
            then.status(401).header("WWW-Authenticate", challenge.as_str());
        })
        .await;
    let token = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/token")
                .query_param("service", "registry.test")
                .query_param("scope", "repository:eval-results/mmlu:pull,push")
                .header("authorization", "Basic dXNlcjpzZWNyZXQ=");
            then.status(200).json_body(serde_json::json!({"token": "t0ken"}));
        })
        .await;
    let start = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{REPO}/blobs/uploads/"))
                .header("authorization", "Bearer t0ken");
            then.status(202)
                .header("Location", format!("{REPO}/blobs/uploads/s"));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{REPO}/blobs/uploads/s"))
                .header("authorization", "Bearer t0ken");
            then.status(201);
        })
        .await;
    let manifest = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{REPO}/manifests/eval-001"))
                .header("authorization", "Bearer t0ken");
            then.status(201);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let persister = RegistryPersister::new(
        &server.base_url(),
        Some("user".to_string()),
        Some("secret".to_string()),
        true,
        Arc::new(NoopEventLogger),
    )
    .unwrap();
    let spec = OCIArtifactSpec::new(write_results(dir.path()), "eval-001", "mmlu", "test-model");
    persister.persist(&spec).await.unwrap();

    token.assert_hits_async(1).await;
    start.assert_hits_async(3).await;
    upload.assert_hits_async(3).await;
    manifest.assert_hits_async(1).await;
    unauthorized.assert_hits_async(1).await;
}

#[tokio::test]
async fn registry_errors_are_surfaced() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{REPO}/blobs/uploads/"));
            then.status(500).body("storage unavailable");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let persister =
        RegistryPersister::new(&server.base_url(), None, None, true, Arc::new(NoopEventLogger))
            .unwrap();
    let spec = OCIArtifactSpec::new(write_results(dir.path()), "eval-001", "mmlu", "test-model");
    match persister.persist(&spec).await {
        Err(PersistError::Registry {
            operation,
            status,
            message,
        }) => {
            assert_eq!(operation, "start upload");
            assert_eq!(status, 500);
            assert_eq!(message, "storage unavailable");
        }
        other => panic!("expected registry error, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_files_fail_before_any_request() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut files = write_results(dir.path());
    files.push(dir.path().join("nonexistent.json"));
    let persister =
        RegistryPersister::new(&server.base_url(), None, None, true, Arc::new(NoopEventLogger))
            .unwrap();
    let spec = OCIArtifactSpec::new(files, "eval-001", "mmlu", "test-model");

    assert!(matches!(
        persister.persist(&spec).await,
        Err(PersistError::Validation(_))
    ));
    any.assert_hits_async(0).await;
}

#[tokio::test]
async fn empty_file_list_skips_the_registry() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(500);
        })
        .await;

    let persister =
        RegistryPersister::new(&server.base_url(), None, None, true, Arc::new(NoopEventLogger))
            .unwrap();
    let result = persister
        .persist(&OCIArtifactSpec::new(vec![], "eval-001", "mmlu", "test-model"))
        .await
        .unwrap();

    assert_eq!(result.size_bytes, 0);
    assert_eq!(result.digest, EMPTY_SET_DIGEST);
    any.assert_hits_async(0).await;
}
