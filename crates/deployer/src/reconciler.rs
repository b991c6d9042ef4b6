//! Repository reconciliation: create-or-get the repository, create-or-update
//! each file, and turn on static hosting.
//!
//! Re-running a task against an existing repository updates files in place
//! instead of failing on already-present paths. Two runs for the same task at
//! the same time can still race between the lookup and the write; no lock is
//! taken.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, warn};

use crate::error::HostError;
use crate::host::{Lookup, PagesStatus, Repository, RepositoryHost};

/// What a successful commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    Updated,
}

/// Result of turning on static hosting. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostingOutcome {
    Enabled,
    AlreadyEnabled,
    Failed(String),
}

impl HostingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Enabled | Self::AlreadyEnabled)
    }
}

pub struct RepositoryReconciler {
    host: Arc<dyn RepositoryHost>,
    owner: String,
}

impl RepositoryReconciler {
    pub fn new(host: Arc<dyn RepositoryHost>, owner: impl Into<String>) -> Self {
        Self {
            host,
            owner: owner.into(),
        }
    }

    pub fn host(&self) -> &Arc<dyn RepositoryHost> {
        &self.host
    }

    /// Fetch `name`, creating it (public, empty) if the host has no such
    /// repository. Any other lookup or creation error is returned.
    pub async fn ensure_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Repository, HostError> {
        match self.host.get_repository(name).await? {
            Lookup::Found(repo) => {
                info!(repo = %repo.full_name, "Repository exists");
                Ok(repo)
            }
            Lookup::NotFound => {
                let repo = self.host.create_repository(name, description).await?;
                info!(repo = %repo.full_name, "Created repository");
                Ok(repo)
            }
        }
    }

    pub async fn commit_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitOutcome, HostError> {
        self.commit_bytes(repo, path, content.as_bytes(), message)
            .await
    }

    pub async fn commit_binary_file(
        &self,
        repo: &Repository,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<CommitOutcome, HostError> {
        self.commit_bytes(repo, path, bytes, message).await
    }

    /// Update when the path has a revision marker, create when it is absent.
    async fn commit_bytes(
        &self,
        repo: &Repository,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<CommitOutcome, HostError> {
        let outcome = match self.host.get_file(repo, path).await? {
            Lookup::Found(existing) => {
                self.host
                    .update_file(repo, path, bytes, message, &existing.sha)
                    .await?;
                CommitOutcome::Updated
            }
            Lookup::NotFound => {
                self.host.create_file(repo, path, bytes, message).await?;
                CommitOutcome::Created
            }
        };
        info!(%path, bytes = bytes.len(), ?outcome, "Committed file");
        Ok(outcome)
    }

    /// Turn on static hosting for `name` from `branch`. "Already enabled"
    /// counts as success; anything else is reported, not raised.
    pub async fn enable_hosting(&self, name: &str, branch: &str) -> HostingOutcome {
        match self.host.enable_pages(name, branch).await {
            Ok(PagesStatus::Enabled) => {
                info!(repo = %name, %branch, "Static hosting enabled");
                HostingOutcome::Enabled
            }
            Ok(PagesStatus::AlreadyEnabled) => {
                info!(repo = %name, "Static hosting already enabled");
                HostingOutcome::AlreadyEnabled
            }
            Ok(PagesStatus::Rejected(status)) => {
                warn!(repo = %name, status, "Pages API rejected the request");
                HostingOutcome::Failed(format!("pages API returned HTTP {status}"))
            }
            Err(e) => {
                warn!(repo = %name, error = %e, "Failed to enable static hosting");
                HostingOutcome::Failed(e.to_string())
            }
        }
    }

    /// MIT license for the configured owner, stamped with the current year.
    pub fn build_license_text(&self) -> String {
        build_license_text(&self.owner)
    }
}

/// MIT license for `owner_name`, stamped with the current UTC year.
pub fn build_license_text(owner_name: &str) -> String {
    render_license(owner_name, Utc::now().year())
}

fn render_license(owner_name: &str, year: i32) -> String {
    format!(
        r#"MIT License

Copyright (c) {year} {owner_name}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CommitKind, InMemoryHost};
    use crate::host::RemoteFile;
    use async_trait::async_trait;

    fn reconciler() -> (RepositoryReconciler, Arc<InMemoryHost>) {
        let host = Arc::new(InMemoryHost::new("octo"));
        let dyn_host: Arc<dyn RepositoryHost> = host.clone();
        (RepositoryReconciler::new(dyn_host, "octo"), host)
    }

    /// Host whose lookups fail with a non-404 status.
    struct BrokenHost;

    #[async_trait]
    impl RepositoryHost for BrokenHost {
        async fn get_repository(&self, _: &str) -> Result<Lookup<Repository>, HostError> {
            Err(HostError::status("get_repository", 401, "Bad credentials"))
        }
        async fn create_repository(&self, _: &str, _: &str) -> Result<Repository, HostError> {
            panic!("create must not be attempted after a non-404 lookup error")
        }
        async fn get_file(&self, _: &Repository, _: &str) -> Result<Lookup<RemoteFile>, HostError> {
            Err(HostError::status("get_file", 500, "boom"))
        }
        async fn create_file(
            &self,
            _: &Repository,
            _: &str,
            _: &[u8],
            _: &str,
        ) -> Result<(), HostError> {
            panic!("no writes after a failed lookup")
        }
        async fn update_file(
            &self,
            _: &Repository,
            _: &str,
            _: &[u8],
            _: &str,
            _: &str,
        ) -> Result<(), HostError> {
            panic!("no writes after a failed lookup")
        }
        async fn enable_pages(&self, _: &str, _: &str) -> Result<PagesStatus, HostError> {
            Ok(PagesStatus::Rejected(403))
        }
        async fn latest_commit(&self, _: &Repository) -> Result<Option<String>, HostError> {
            Ok(None)
        }
    }

    fn dummy_repo() -> Repository {
        Repository {
            name: "t".into(),
            full_name: "octo/t".into(),
            html_url: "https://github.com/octo/t".into(),
        }
    }

    #[tokio::test]
    async fn test_ensure_repository_is_idempotent() {
        let (reconciler, host) = reconciler();

        let first = reconciler.ensure_repository("t", "Task: t").await.unwrap();
        let second = reconciler.ensure_repository("t", "Task: t").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(host.repository_count(), 1);
        assert_eq!(host.description("t").as_deref(), Some("Task: t"));
    }

    #[tokio::test]
    async fn test_commit_creates_then_updates() {
        let (reconciler, host) = reconciler();
        let repo = reconciler.ensure_repository("t", "").await.unwrap();

        let first = reconciler
            .commit_file(&repo, "index.html", "v1", "Add index.html")
            .await
            .unwrap();
        let second = reconciler
            .commit_file(&repo, "index.html", "v2", "Add index.html")
            .await
            .unwrap();
        let third = reconciler
            .commit_file(&repo, "index.html", "v3", "Add index.html")
            .await
            .unwrap();

        assert_eq!(first, CommitOutcome::Created);
        assert_eq!(second, CommitOutcome::Updated);
        assert_eq!(third, CommitOutcome::Updated);
        let kinds: Vec<_> = host.commits("t").iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![CommitKind::Create, CommitKind::Update, CommitKind::Update]
        );
        assert_eq!(host.file_text("t", "index.html").as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_binary_commit_keeps_bytes() {
        let (reconciler, host) = reconciler();
        let repo = reconciler.ensure_repository("t", "").await.unwrap();

        reconciler
            .commit_binary_file(
                &repo,
                "logo.png",
                &[0x89, 0x50, 0x00, 0xff],
                "Add attachment logo.png",
            )
            .await
            .unwrap();

        assert_eq!(host.file("t", "logo.png"), Some(vec![0x89, 0x50, 0x00, 0xff]));
    }

    #[tokio::test]
    async fn test_non_not_found_errors_propagate() {
        let reconciler = RepositoryReconciler::new(Arc::new(BrokenHost), "octo");

        assert!(reconciler.ensure_repository("t", "").await.is_err());
        assert!(reconciler
            .commit_file(&dummy_repo(), "a.txt", "a", "Add a.txt")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_enable_hosting_outcomes() {
        let (reconciler, _host) = reconciler();
        reconciler.ensure_repository("t", "").await.unwrap();

        assert_eq!(reconciler.enable_hosting("t", "main").await, HostingOutcome::Enabled);
        assert!(reconciler.enable_hosting("t", "main").await.is_success());

        let broken = RepositoryReconciler::new(Arc::new(BrokenHost), "octo");
        let outcome = broken.enable_hosting("t", "main").await;
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_license_text() {
        let text = render_license("octo", 2031);
        assert!(text.starts_with("MIT License\n\nCopyright (c) 2031 octo\n"));
        assert!(text.contains("THE SOFTWARE IS PROVIDED \"AS IS\""));

        let current = build_license_text("octo");
        assert!(current.contains(&format!("Copyright (c) {} octo", Utc::now().year())));
    }
}
