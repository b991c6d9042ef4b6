//! End-to-end pipeline tests against the in-memory repository host.
//!
//! Every run goes through the real generator, reconciler and state machine;
//! only the network edges (backend, callback transport, and in one case the
//! host) are replaced with recording fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use codegen::AttachmentRef;
use deployer::backend::{BackendError, GenerativeBackend};
use deployer::generator::ContentGenerator;
use deployer::host::{Lookup, PagesStatus, RemoteFile, Repository, RepositoryHost};
use deployer::memory::{CommitKind, InMemoryHost};
use deployer::notifier::{CallbackTransport, DeliveryResponse, Notifier, NotifyError};
use deployer::orchestrator::TaskOrchestrator;
use deployer::reconciler::RepositoryReconciler;
use deployer::{
    DeployerConfig, HostError, NotificationPayload, PipelineError, TaskRequest, TaskState,
};
use rust_xlsxwriter::Workbook;

// ── Fakes ──────────────────────────────────────────────────────────

/// Records every delivered payload and answers with a fixed status.
struct RecordingTransport {
    status: u16,
    deliveries: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingTransport {
    fn answering(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            deliveries: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<(String, NotificationPayload)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn post_json(
        &self,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResponse, NotifyError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(DeliveryResponse {
            status: self.status,
            body: String::new(),
        })
    }
}

/// Backend that always answers with the same text.
struct CannedBackend(&'static str);

#[async_trait]
impl GenerativeBackend for CannedBackend {
    async fn complete(&self, _prompt: &str) -> Result<String, BackendError> {
        Ok(self.0.to_string())
    }
}

/// Host whose repository endpoint is down.
struct UnavailableHost;

#[async_trait]
impl RepositoryHost for UnavailableHost {
    async fn get_repository(&self, _: &str) -> Result<Lookup<Repository>, HostError> {
        Err(HostError::status("get_repository", 503, "service unavailable"))
    }
    async fn create_repository(&self, _: &str, _: &str) -> Result<Repository, HostError> {
        unreachable!("creation must not be attempted after a failed lookup")
    }
    async fn get_file(&self, _: &Repository, _: &str) -> Result<Lookup<RemoteFile>, HostError> {
        unreachable!()
    }
    async fn create_file(
        &self,
        _: &Repository,
        _: &str,
        _: &[u8],
        _: &str,
    ) -> Result<(), HostError> {
        unreachable!()
    }
    async fn update_file(
        &self,
        _: &Repository,
        _: &str,
        _: &[u8],
        _: &str,
        _: &str,
    ) -> Result<(), HostError> {
        unreachable!()
    }
    async fn enable_pages(&self, _: &str, _: &str) -> Result<PagesStatus, HostError> {
        unreachable!()
    }
    async fn latest_commit(&self, _: &Repository) -> Result<Option<String>, HostError> {
        unreachable!()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

const CALLBACK: &str = "https://evaluator.example.com/notify";

fn config(scratch: &tempfile::TempDir) -> DeployerConfig {
    let mut config = DeployerConfig::new("token", "alice");
    config.scratch_dir = scratch.path().to_path_buf();
    config.settle_delay = Duration::ZERO;
    config.notify_max_attempts = 3;
    config
}

fn orchestrator(
    host: Arc<dyn RepositoryHost>,
    backend: Option<Arc<dyn GenerativeBackend>>,
    transport: Arc<RecordingTransport>,
    scratch: &tempfile::TempDir,
) -> TaskOrchestrator {
    TaskOrchestrator::new(
        ContentGenerator::new(backend),
        RepositoryReconciler::new(host, "alice"),
        Notifier::new(transport, Duration::from_millis(10)),
        config(scratch),
    )
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

fn sales_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "region").unwrap();
    sheet.write_string(0, 1, "revenue").unwrap();
    sheet.write_string(1, 0, "north").unwrap();
    sheet.write_number(1, 1, 42.0).unwrap();
    sheet.write_string(2, 0, "south").unwrap();
    sheet.write_number(2, 1, 17.5).unwrap();
    workbook.save_to_buffer().unwrap()
}

fn request(task: &str, brief: &str, attachments: Vec<AttachmentRef>) -> TaskRequest {
    TaskRequest {
        task: task.into(),
        email: "student@example.com".into(),
        round: 1,
        brief: brief.into(),
        checks: vec!["Page has a heading".into()],
        attachments,
        evaluation_url: Some(CALLBACK.into()),
        nonce: "nonce-123".into(),
    }
}

fn pipeline_request() -> TaskRequest {
    request(
        "sales-pipeline",
        "Fix the script and run it with a GitHub Actions workflow",
        vec![
            AttachmentRef {
                name: "execute.py".into(),
                url: data_url("text/x-python", b"total_revenew = 0\nprint(total_revenew)\n"),
            },
            AttachmentRef {
                name: "data.xlsx".into(),
                url: data_url(
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                    &sales_workbook(),
                ),
            },
        ],
    )
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_data_pipeline_task_publishes_and_notifies() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(host.clone(), None, transport.clone(), &scratch);

    let report = orchestrator.run(pipeline_request()).await.unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert_eq!(report.generation_source, "data_pipeline");
    assert!(report.soft_failures.is_empty(), "{:?}", report.soft_failures);
    assert!(report.notified);

    let script = host.file_text("sales-pipeline", "execute.py").unwrap();
    assert!(script.contains("total_revenue"));
    assert!(!script.contains("revenew"));

    let csv = host.file_text("sales-pipeline", "data.csv").unwrap();
    assert!(csv.starts_with("region,revenue"));
    assert!(csv.contains("north,42"));
    assert!(csv.contains("south,17.5"));

    let workflow = host
        .file_text("sales-pipeline", ".github/workflows/ci.yml")
        .unwrap();
    assert!(workflow.contains("python execute.py > result.json"));

    let paths = host.paths("sales-pipeline");
    assert!(!paths.contains(&"result.json".to_string()));
    assert!(paths.contains(&"README.md".to_string()));
    let workbook = host.file("sales-pipeline", "data.xlsx").unwrap();
    assert!(workbook.starts_with(b"PK"));
    assert!(host.file_text("sales-pipeline", "LICENSE").unwrap().contains("MIT License"));
    assert_eq!(host.pages_branch("sales-pipeline").as_deref(), Some("main"));
    assert_eq!(host.description("sales-pipeline").as_deref(), Some("Task: sales-pipeline"));

    let messages: Vec<String> = host
        .commits("sales-pipeline")
        .into_iter()
        .map(|c| c.message)
        .collect();
    assert!(messages.contains(&"Add execute.py".to_string()));
    assert!(messages.contains(&"Add attachment data.xlsx".to_string()));
    assert!(!messages.contains(&"Add attachment execute.py".to_string()));
    assert_eq!(messages.last().map(String::as_str), Some("Add MIT LICENSE"));

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (url, payload) = &deliveries[0];
    assert_eq!(url, CALLBACK);
    assert_eq!(payload.task, "sales-pipeline");
    assert_eq!(payload.nonce, "nonce-123");
    assert_eq!(payload.round, 1);
    assert_eq!(payload.repo_url, "https://github.com/alice/sales-pipeline");
    assert_eq!(payload.pages_url, "https://alice.github.io/sales-pipeline/");
    assert_eq!(payload.commit_sha, report.commit_sha);
    assert!(payload.commit_sha.is_some());
}

#[tokio::test]
async fn test_unparsable_backend_reply_publishes_fallback() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let backend: Arc<dyn GenerativeBackend> = Arc::new(CannedBackend("Sure! Here is your page."));
    let orchestrator = orchestrator(host.clone(), Some(backend), transport.clone(), &scratch);

    let report = orchestrator
        .run(request("hello-page", "Show <b>hello</b>", Vec::new()))
        .await
        .unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert_eq!(report.generation_source, "fallback");
    assert_eq!(report.soft_failures.len(), 1);
    assert_eq!(host.paths("hello-page"), vec!["LICENSE", "README.md", "index.html"]);

    let html = host.file_text("hello-page", "index.html").unwrap();
    assert!(html.contains("&lt;b&gt;hello&lt;/b&gt;"));
    assert_eq!(host.pages_branch("hello-page").as_deref(), Some("main"));
    assert_eq!(transport.deliveries().len(), 1);
}

#[tokio::test]
async fn test_backend_files_are_committed() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let backend: Arc<dyn GenerativeBackend> = Arc::new(CannedBackend(
        "```json\n{\"files\": {\"index.html\": \"<h1>Hi</h1>\", \"README.md\": \"# Hi\", \"app.js\": \"console.log(1)\"}}\n```",
    ));
    let orchestrator = orchestrator(host.clone(), Some(backend), transport, &scratch);

    let report = orchestrator
        .run(request("hi", "Say hi", Vec::new()))
        .await
        .unwrap();

    assert_eq!(report.generation_source, "backend");
    assert_eq!(report.generated_files, vec!["README.md", "app.js", "index.html"]);
    assert_eq!(host.file_text("hi", "index.html").as_deref(), Some("<h1>Hi</h1>"));
    assert_eq!(report.committed, 4);
}

#[tokio::test]
async fn test_rerun_updates_instead_of_creating() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(host.clone(), None, transport.clone(), &scratch);

    orchestrator.run(pipeline_request()).await.unwrap();
    let first_paths = host.paths("sales-pipeline");
    let first_commits = host.commits("sales-pipeline").len();
    assert!(host
        .commits("sales-pipeline")
        .iter()
        .all(|c| c.kind == CommitKind::Create));

    let mut second = pipeline_request();
    second.round = 2;
    let report = orchestrator.run(second).await.unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert!(report.soft_failures.is_empty(), "{:?}", report.soft_failures);
    assert_eq!(host.repository_count(), 1);
    assert_eq!(host.paths("sales-pipeline"), first_paths);

    let commits = host.commits("sales-pipeline");
    assert_eq!(commits.len(), first_commits * 2);
    assert!(commits[first_commits..]
        .iter()
        .all(|c| c.kind == CommitKind::Update));

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].1.round, 2);
}

#[tokio::test]
async fn test_repository_failure_abandons_run_without_notifying() {
    let scratch = tempfile::tempdir().unwrap();
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(Arc::new(UnavailableHost), None, transport.clone(), &scratch);

    let err = orchestrator
        .run(request("down", "Anything", Vec::new()))
        .await
        .unwrap_err();

    match err {
        PipelineError::Fatal { stage, source } => {
            assert_eq!(stage, TaskState::RepositoryReady);
            assert!(matches!(source, HostError::Status { status: 503, .. }));
        }
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert!(transport.deliveries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_notification_still_completes() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(500);
    let orchestrator = orchestrator(host.clone(), None, transport.clone(), &scratch);

    let report = orchestrator
        .run(request("flaky-eval", "A page", Vec::new()))
        .await
        .unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert!(!report.notified);
    assert_eq!(transport.deliveries().len(), 3);
    assert!(report
        .soft_failures
        .iter()
        .any(|f| f.contains("not notified")));
    assert!(host.paths("flaky-eval").contains(&"index.html".to_string()));
}

#[tokio::test]
async fn test_missing_evaluation_url_skips_notification() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(host.clone(), None, transport.clone(), &scratch);

    let mut req = request("no-callback", "A page", Vec::new());
    req.evaluation_url = None;
    let report = orchestrator.run(req).await.unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert!(!report.notified);
    assert!(transport.deliveries().is_empty());
}

#[tokio::test]
async fn test_undecodable_attachment_is_skipped() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(host.clone(), None, transport, &scratch);

    let attachments = vec![
        AttachmentRef {
            name: "notes.txt".into(),
            url: "data:text/plain;base64,@@not-base64@@".into(),
        },
        AttachmentRef {
            name: "remote.png".into(),
            url: "https://example.com/remote.png".into(),
        },
        AttachmentRef {
            name: "logo.png".into(),
            url: data_url("image/png", &[0x89, b'P', b'N', b'G']),
        },
    ];
    let report = orchestrator
        .run(request("with-assets", "A page", attachments))
        .await
        .unwrap();

    assert_eq!(report.final_state, TaskState::Done);
    assert!(report
        .soft_failures
        .iter()
        .any(|f| f.contains("1 attachment(s) could not be decoded")));
    let paths = host.paths("with-assets");
    assert!(paths.contains(&"logo.png".to_string()));
    assert!(!paths.contains(&"notes.txt".to_string()));
    assert!(!paths.contains(&"remote.png".to_string()));
    assert_eq!(host.file("with-assets", "logo.png"), Some(vec![0x89, b'P', b'N', b'G']));
}

#[tokio::test]
async fn test_transitions_follow_stage_order() {
    let scratch = tempfile::tempdir().unwrap();
    let host = Arc::new(InMemoryHost::new("alice"));
    let transport = RecordingTransport::answering(200);
    let orchestrator = orchestrator(host, None, transport, &scratch);

    let report = orchestrator
        .run(request("ordered", "A page", Vec::new()))
        .await
        .unwrap();

    let visited: Vec<TaskState> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        visited,
        vec![
            TaskState::AttachmentsDecoded,
            TaskState::RepositoryReady,
            TaskState::Generated,
            TaskState::FilesCommitted,
            TaskState::AttachmentsCommitted,
            TaskState::LicenseCommitted,
            TaskState::HostingEnabled,
            TaskState::CommitResolved,
            TaskState::Notified,
            TaskState::Done,
        ]
    );
}
