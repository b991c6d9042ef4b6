//! Process-local repository host.
//!
//! Behaves like the real host where the pipeline can observe it: lookups
//! return `NotFound` for missing paths, creates over an existing path and
//! updates with a stale revision marker are conflicts, and turning on pages
//! twice reports `AlreadyEnabled`. Revision markers are content hashes.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::HostError;
use crate::host::{Lookup, PagesStatus, RemoteFile, Repository, RepositoryHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Create,
    Update,
}

/// One recorded file commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sha: String,
    pub path: String,
    pub kind: CommitKind,
    pub message: String,
}

#[derive(Debug, Clone)]
struct StoredFile {
    sha: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct RepoState {
    repo: Repository,
    description: String,
    files: BTreeMap<String, StoredFile>,
    commits: Vec<CommitRecord>,
    pages_branch: Option<String>,
}

pub struct InMemoryHost {
    owner: String,
    repos: Mutex<BTreeMap<String, RepoState>>,
}

impl InMemoryHost {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repos: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RepoState>> {
        self.repos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current bytes of `path` in repository `name`.
    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(name)
            .and_then(|r| r.files.get(path))
            .map(|f| f.bytes.clone())
    }

    pub fn file_text(&self, name: &str, path: &str) -> Option<String> {
        self.file(name, path)
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// Tracked paths in repository `name`, sorted.
    pub fn paths(&self, name: &str) -> Vec<String> {
        self.lock()
            .get(name)
            .map(|r| r.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every file commit in repository `name`, oldest first.
    pub fn commits(&self, name: &str) -> Vec<CommitRecord> {
        self.lock()
            .get(name)
            .map(|r| r.commits.clone())
            .unwrap_or_default()
    }

    pub fn description(&self, name: &str) -> Option<String> {
        self.lock().get(name).map(|r| r.description.clone())
    }

    /// Branch pages is served from, if enabled.
    pub fn pages_branch(&self, name: &str) -> Option<String> {
        self.lock().get(name).and_then(|r| r.pages_branch.clone())
    }

    pub fn repository_count(&self) -> usize {
        self.lock().len()
    }

    fn content_sha(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    fn write(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        expected_sha: Option<&str>,
    ) -> Result<(), HostError> {
        let mut repos = self.lock();
        let state = repos
            .get_mut(&repo.name)
            .ok_or_else(|| HostError::UnknownRepository(repo.name.clone()))?;

        let current = state.files.get(path).map(|f| f.sha.as_str());
        if current != expected_sha {
            return Err(HostError::Conflict { path: path.into() });
        }

        let kind = if expected_sha.is_some() {
            CommitKind::Update
        } else {
            CommitKind::Create
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(content);
        hasher.update(&(state.commits.len() as u64).to_le_bytes());
        let commit_sha = hasher.finalize().to_hex().to_string();

        state.files.insert(
            path.to_string(),
            StoredFile {
                sha: Self::content_sha(content),
                bytes: content.to_vec(),
            },
        );
        state.commits.push(CommitRecord {
            sha: commit_sha,
            path: path.to_string(),
            kind,
            message: message.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl RepositoryHost for InMemoryHost {
    async fn get_repository(&self, name: &str) -> Result<Lookup<Repository>, HostError> {
        Ok(match self.lock().get(name) {
            Some(state) => Lookup::Found(state.repo.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Repository, HostError> {
        let mut repos = self.lock();
        if repos.contains_key(name) {
            return Err(HostError::status(
                "create_repository",
                422,
                "name already exists on this account",
            ));
        }
        let repo = Repository {
            name: name.to_string(),
            full_name: format!("{}/{}", self.owner, name),
            html_url: format!("https://github.com/{}/{}", self.owner, name),
        };
        repos.insert(
            name.to_string(),
            RepoState {
                repo: repo.clone(),
                description: description.to_string(),
                files: BTreeMap::new(),
                commits: Vec::new(),
                pages_branch: None,
            },
        );
        Ok(repo)
    }

    async fn get_file(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Lookup<RemoteFile>, HostError> {
        let repos = self.lock();
        let state = repos
            .get(&repo.name)
            .ok_or_else(|| HostError::UnknownRepository(repo.name.clone()))?;
        Ok(match state.files.get(path) {
            Some(file) => Lookup::Found(RemoteFile {
                path: path.to_string(),
                sha: file.sha.clone(),
            }),
            None => Lookup::NotFound,
        })
    }

    async fn create_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError> {
        self.write(repo, path, content, message, None)
    }

    async fn update_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        self.write(repo, path, content, message, Some(sha))
    }

    async fn enable_pages(&self, repo_name: &str, branch: &str) -> Result<PagesStatus, HostError> {
        let mut repos = self.lock();
        let Some(state) = repos.get_mut(repo_name) else {
            return Ok(PagesStatus::Rejected(404));
        };
        if state.pages_branch.is_some() {
            return Ok(PagesStatus::AlreadyEnabled);
        }
        state.pages_branch = Some(branch.to_string());
        Ok(PagesStatus::Enabled)
    }

    async fn latest_commit(&self, repo: &Repository) -> Result<Option<String>, HostError> {
        let repos = self.lock();
        let state = repos
            .get(&repo.name)
            .ok_or_else(|| HostError::UnknownRepository(repo.name.clone()))?;
        Ok(state.commits.last().map(|c| c.sha.clone()))
    }
}
