//! Task orchestrator: runs one accepted request from decoding to notification.
//!
//! Runs are independent. The only things two concurrent runs can share are
//! the repository (when they carry the same task name) and the attachment
//! scratch directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use codegen::{
    classify, decode_attachments, AttachmentRef, DecodedAttachment, FileContent, GeneratedFileSet,
    GenerationStrategy,
};
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{GeminiBackend, GenerativeBackend};
use crate::config::DeployerConfig;
use crate::error::{HostError, PipelineError};
use crate::generator::{ContentGenerator, GenerationSource};
use crate::host::{GitHubHost, Repository, RepositoryHost};
use crate::notifier::{CallbackTransport, HttpTransport, Notifier};
use crate::reconciler::{HostingOutcome, RepositoryReconciler};
use crate::request::{NotificationPayload, TaskRequest};
use crate::stages::{StageOutcome, StageRunner, TaskState, TransitionRecord};

pub const LICENSE_PATH: &str = "LICENSE";

/// Strategy a run of `request` would take, judged on the attachments that
/// actually decode (into `scratch_dir`), as the pipeline does.
pub fn classify_request(request: &TaskRequest, scratch_dir: &Path) -> GenerationStrategy {
    let decoded = decode_attachments(&request.attachments, scratch_dir);
    let names: Vec<&str> = decoded.iter().map(|a| a.name.as_str()).collect();
    classify(&request.brief, &names)
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task: String,
    pub final_state: TaskState,
    pub generation_source: String,
    pub generated_files: Vec<String>,
    pub committed: usize,
    pub failed_commits: Vec<String>,
    pub repo_url: String,
    pub pages_url: String,
    pub commit_sha: Option<String>,
    pub notified: bool,
    pub soft_failures: Vec<String>,
    pub transitions: Vec<TransitionRecord>,
}

/// Result of a batch of file commits.
#[derive(Debug, Default)]
struct CommitBatch {
    committed: usize,
    failed: Vec<String>,
}

impl CommitBatch {
    fn into_outcome(self, what: &str) -> StageOutcome<CommitBatch> {
        if self.failed.is_empty() {
            StageOutcome::Succeeded(self)
        } else {
            let reason = format!(
                "{} {what} failed to commit: {}",
                self.failed.len(),
                self.failed.join(", ")
            );
            StageOutcome::SoftFailure(self, reason)
        }
    }
}

pub struct TaskOrchestrator {
    generator: ContentGenerator,
    reconciler: RepositoryReconciler,
    notifier: Notifier,
    config: DeployerConfig,
}

impl TaskOrchestrator {
    pub fn new(
        generator: ContentGenerator,
        reconciler: RepositoryReconciler,
        notifier: Notifier,
        config: DeployerConfig,
    ) -> Self {
        Self {
            generator,
            reconciler,
            notifier,
            config,
        }
    }

    /// Wire the orchestrator to GitHub, Gemini (when configured) and HTTP
    /// notifications.
    pub fn from_config(config: &DeployerConfig) -> Result<Self> {
        let host: Arc<dyn RepositoryHost> =
            Arc::new(GitHubHost::new(config).context("Failed to build GitHub client")?);
        let transport: Arc<dyn CallbackTransport> = Arc::new(
            HttpTransport::new(config.http_timeout).context("Failed to build notification client")?,
        );
        Self::with_host(config, host, transport)
    }

    /// Wire the orchestrator to an arbitrary repository host and transport.
    pub fn with_host(
        config: &DeployerConfig,
        host: Arc<dyn RepositoryHost>,
        transport: Arc<dyn CallbackTransport>,
    ) -> Result<Self> {
        let backend: Option<Arc<dyn GenerativeBackend>> = match &config.gemini {
            Some(endpoint) => {
                let backend = GeminiBackend::new(endpoint.clone(), config.http_timeout)
                    .context("Failed to build Gemini client")?;
                info!(model = %backend.model(), "Generative backend configured");
                Some(Arc::new(backend))
            }
            None => {
                warn!("No GEMINI_API_KEY, general tasks will use fallback files");
                None
            }
        };

        Ok(Self::new(
            ContentGenerator::new(backend),
            RepositoryReconciler::new(host, config.github_owner.clone()),
            Notifier::new(transport, config.notify_initial_delay),
            config.clone(),
        ))
    }

    /// Run in the background on `tracker`. Errors are logged, not returned.
    pub fn spawn(self: &Arc<Self>, tracker: &TaskTracker, request: TaskRequest) {
        let orchestrator = Arc::clone(self);
        let span = info_span!(
            "task",
            run_id = %Uuid::new_v4(),
            task = %request.task,
            round = request.round
        );
        tracker.spawn(
            async move {
                match orchestrator.run(request).await {
                    Ok(report) => info!(
                        notified = report.notified,
                        soft_failures = report.soft_failures.len(),
                        "Task run finished"
                    ),
                    Err(e) => error!(error = ?anyhow::Error::from(e), "Task run abandoned"),
                }
            }
            .instrument(span),
        );
    }

    /// Process one request through every stage.
    ///
    /// Only a failure to get or create the repository ends the run early; in
    /// that case no notification is sent.
    pub async fn run(&self, request: TaskRequest) -> Result<RunReport, PipelineError> {
        info!(
            task = %request.task,
            email = %request.email,
            round = request.round,
            "Processing task"
        );
        let mut runner = StageRunner::new();

        let outcome = self.decode_stage(&request.attachments).await;
        let attachments = runner.apply(TaskState::AttachmentsDecoded, outcome)?;

        let outcome = match self
            .reconciler
            .ensure_repository(&request.task, &format!("Task: {}", request.task))
            .await
        {
            Ok(repo) => StageOutcome::Succeeded(repo),
            Err(e) => StageOutcome::Fatal(e),
        };
        let repo = runner.apply(TaskState::RepositoryReady, outcome)?;

        let generation = self
            .generator
            .generate_with_source(&request.brief, &request.checks, &attachments, request.round)
            .await;
        let generation_source = generation.source;
        let outcome = match (generation.source, generation.fallback_reason) {
            (GenerationSource::Fallback, Some(reason)) => {
                let reason = format!("used fallback files: {reason}");
                StageOutcome::SoftFailure(generation.files, reason)
            }
            _ => StageOutcome::Succeeded(generation.files),
        };
        let files = runner.apply(TaskState::Generated, outcome)?;

        let outcome = self.commit_generated(&repo, &files).await.into_outcome("generated file(s)");
        let generated_batch = runner.apply(TaskState::FilesCommitted, outcome)?;

        let outcome = self
            .commit_attachments(&repo, &attachments, &files)
            .await
            .into_outcome("attachment(s)");
        let attachment_batch = runner.apply(TaskState::AttachmentsCommitted, outcome)?;

        let outcome = self.commit_license(&repo).await;
        let license_batch = runner.apply(TaskState::LicenseCommitted, outcome)?;

        let hosting = self
            .reconciler
            .enable_hosting(&request.task, &self.config.pages_branch)
            .await;
        let outcome = match hosting {
            HostingOutcome::Failed(reason) => StageOutcome::SoftFailure((), reason),
            _ => StageOutcome::Succeeded(()),
        };
        runner.apply(TaskState::HostingEnabled, outcome)?;

        if !self.config.settle_delay.is_zero() {
            info!(
                secs = self.config.settle_delay.as_secs(),
                "Waiting for pages deployment"
            );
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let outcome = match self.reconciler.host().latest_commit(&repo).await {
            Ok(Some(sha)) => StageOutcome::Succeeded(Some(sha)),
            Ok(None) => StageOutcome::SoftFailure(None, "repository has no commits".into()),
            Err(e) => {
                StageOutcome::SoftFailure(None, format!("could not resolve latest commit: {e}"))
            }
        };
        let commit_sha = runner.apply(TaskState::CommitResolved, outcome)?;

        let pages_url = self.config.pages_url(&request.task);
        let payload = NotificationPayload {
            email: request.email.clone(),
            task: request.task.clone(),
            round: request.round,
            nonce: request.nonce.clone(),
            repo_url: repo.html_url.clone(),
            commit_sha: commit_sha.clone(),
            pages_url: pages_url.clone(),
        };
        let url = request.evaluation_url.as_deref().unwrap_or_default();
        let notified = self
            .notifier
            .notify(url, &payload, self.config.notify_max_attempts)
            .await;
        let outcome = if notified {
            StageOutcome::Succeeded(())
        } else if url.is_empty() {
            StageOutcome::SoftFailure((), "no evaluation URL".into())
        } else {
            StageOutcome::SoftFailure((), "evaluation server was not notified".into())
        };
        runner.apply(TaskState::Notified, outcome)?;
        runner.finish()?;

        info!(repo = %repo.html_url, pages = %pages_url, "Task completed");

        let mut failed_commits = generated_batch.failed;
        failed_commits.extend(attachment_batch.failed);
        failed_commits.extend(license_batch.failed);

        Ok(RunReport {
            task: request.task,
            final_state: runner.current(),
            generation_source: generation_source.to_string(),
            generated_files: files.paths().map(str::to_string).collect(),
            committed: generated_batch.committed
                + attachment_batch.committed
                + license_batch.committed,
            failed_commits,
            repo_url: repo.html_url,
            pages_url,
            commit_sha,
            notified,
            soft_failures: runner.soft_failures().to_vec(),
            transitions: runner.transitions().to_vec(),
        })
    }

    async fn decode_stage(&self, refs: &[AttachmentRef]) -> StageOutcome<Vec<DecodedAttachment>> {
        let expected = refs.iter().filter(|a| a.is_data_url()).count();
        let refs = refs.to_vec();
        let scratch_dir = self.config.scratch_dir.clone();

        let task = tokio::task::spawn_blocking(move || decode_attachments(&refs, &scratch_dir));
        let decoded = match task.await {
            Ok(decoded) => decoded,
            Err(e) => {
                let reason = format!("attachment decoding panicked: {e}");
                return StageOutcome::SoftFailure(Vec::new(), reason);
            }
        };

        if decoded.len() < expected {
            let skipped = expected - decoded.len();
            let reason = format!("{skipped} attachment(s) could not be decoded");
            StageOutcome::SoftFailure(decoded, reason)
        } else {
            StageOutcome::Succeeded(decoded)
        }
    }

    async fn commit_generated(&self, repo: &Repository, files: &GeneratedFileSet) -> CommitBatch {
        let mut batch = CommitBatch::default();
        for (path, content) in files.iter() {
            let message = format!("Add {path}");
            let result = match content {
                FileContent::Text(text) => {
                    self.reconciler
                        .commit_file(repo, path, text, &message)
                        .await
                }
                FileContent::Binary(bytes) => {
                    self.reconciler
                        .commit_binary_file(repo, path, bytes, &message)
                        .await
                }
            };
            record(&mut batch, path, result);
        }
        batch
    }

    /// Commit attachments the generated set did not already account for.
    async fn commit_attachments(
        &self,
        repo: &Repository,
        attachments: &[DecodedAttachment],
        files: &GeneratedFileSet,
    ) -> CommitBatch {
        let mut batch = CommitBatch::default();
        for att in attachments {
            if files.contains(&att.name) {
                info!(name = %att.name, "Skipped attachment (already processed)");
                continue;
            }
            let message = format!("Add attachment {}", att.name);
            let result = self
                .reconciler
                .commit_binary_file(repo, &att.name, &att.bytes, &message)
                .await;
            record(&mut batch, &att.name, result);
        }
        batch
    }

    async fn commit_license(&self, repo: &Repository) -> StageOutcome<CommitBatch> {
        let mut batch = CommitBatch::default();
        let license = self.reconciler.build_license_text();
        let result = self
            .reconciler
            .commit_file(repo, LICENSE_PATH, &license, "Add MIT LICENSE")
            .await;
        record(&mut batch, LICENSE_PATH, result);
        batch.into_outcome("license file")
    }
}

fn record<T>(batch: &mut CommitBatch, path: &str, result: Result<T, HostError>) {
    match result {
        Ok(_) => batch.committed += 1,
        Err(e) => {
            warn!(%path, error = %e, "Failed to commit file");
            batch.failed.push(path.to_string());
        }
    }
}
