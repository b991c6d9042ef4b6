//! The inbound endpoint answers before the pipeline finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use deployer::config::DeployerConfig;
use deployer::host::{Lookup, PagesStatus, RemoteFile, Repository, RepositoryHost};
use deployer::memory::InMemoryHost;
use deployer::notifier::HttpTransport;
use deployer::orchestrator::TaskOrchestrator;
use deployer::server::{router, AppState};
use deployer::HostError;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

/// In-memory host whose first repository lookup waits for `open`.
struct GatedHost {
    inner: InMemoryHost,
    gate: Notify,
}

#[async_trait]
impl RepositoryHost for GatedHost {
    async fn get_repository(&self, name: &str) -> Result<Lookup<Repository>, HostError> {
        self.gate.notified().await;
        self.inner.get_repository(name).await
    }
    async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Repository, HostError> {
        self.inner.create_repository(name, description).await
    }
    async fn get_file(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Lookup<RemoteFile>, HostError> {
        self.inner.get_file(repo, path).await
    }
    async fn create_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError> {
        self.inner.create_file(repo, path, content, message).await
    }
    async fn update_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        self.inner.update_file(repo, path, content, message, sha).await
    }
    async fn enable_pages(&self, repo_name: &str, branch: &str) -> Result<PagesStatus, HostError> {
        self.inner.enable_pages(repo_name, branch).await
    }
    async fn latest_commit(&self, repo: &Repository) -> Result<Option<String>, HostError> {
        self.inner.latest_commit(repo).await
    }
}

#[tokio::test]
async fn test_accepts_before_pipeline_completes() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = DeployerConfig::new("token", "alice");
    config.scratch_dir = scratch.path().to_path_buf();
    config.settle_delay = Duration::ZERO;

    let host = Arc::new(GatedHost {
        inner: InMemoryHost::new("alice"),
        gate: Notify::new(),
    });
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(1)).unwrap());
    let orchestrator = TaskOrchestrator::with_host(&config, host.clone(), transport).unwrap();
    let tracker = TaskTracker::new();
    let app = router(AppState::new(Arc::new(orchestrator), "s3cret", tracker.clone()));

    let body = serde_json::json!({
        "secret": "s3cret",
        "task": "gated",
        "brief": "A page",
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api-endpoint")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(tracker.len(), 1);
    assert_eq!(host.inner.repository_count(), 0);

    host.gate.notify_one();
    tracker.close();
    tracker.wait().await;

    assert_eq!(host.inner.repository_count(), 1);
    assert!(host.inner.paths("gated").contains(&"LICENSE".to_string()));
}
