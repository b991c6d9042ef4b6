//! Repository host: a versioned file store with a REST surface.
//!
//! [`GitHubHost`] talks to the GitHub REST v3 API. [`crate::memory::InMemoryHost`]
//! is a process-local stand-in for dry runs and tests.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::DeployerConfig;
use crate::error::HostError;

/// Result of a lookup where absence is an expected answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

/// A repository on the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
}

/// Current revision marker of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
}

/// Answer to a request to turn on static hosting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesStatus {
    Enabled,
    AlreadyEnabled,
    Rejected(u16),
}

#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn get_repository(&self, name: &str) -> Result<Lookup<Repository>, HostError>;

    /// Create a public repository with no initial commit.
    async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Repository, HostError>;

    async fn get_file(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Lookup<RemoteFile>, HostError>;

    async fn create_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError>;

    /// Replace a file whose current revision marker is `sha`.
    async fn update_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<(), HostError>;

    async fn enable_pages(&self, repo_name: &str, branch: &str) -> Result<PagesStatus, HostError>;

    /// Most recent commit on the default branch; `None` for an empty repository.
    async fn latest_commit(&self, repo: &Repository) -> Result<Option<String>, HostError>;
}

/// Read a success body. Transport failures stay [`HostError::Http`]; a body
/// that is not the expected JSON becomes [`HostError::Decode`].
async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T, HostError> {
    let body = response.text().await?;
    parse_body(operation, &body)
}

fn parse_body<T: DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, HostError> {
    serde_json::from_str(body).map_err(|source| HostError::Decode { operation, source })
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
}

/// GitHub REST v3 client scoped to one owner.
pub struct GitHubHost {
    api_url: String,
    owner: String,
    client: reqwest::Client,
}

impl GitHubHost {
    pub fn new(config: &DeployerConfig) -> Result<Self, HostError> {
        let mut auth = HeaderValue::from_str(&format!("token {}", config.github_token))
            .map_err(|_| HostError::InvalidRequest("token is not a valid header value".into()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("deployer/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            api_url: config.github_api_url.clone(),
            owner: config.github_owner.clone(),
            client,
        })
    }

    fn repo_url(&self, name: &str, suffix: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, name, suffix)
    }

    /// `/repos/{owner}/{repo}/contents/{path}` with each path segment encoded.
    fn contents_url(&self, repo: &Repository, path: &str) -> Result<Url, HostError> {
        let mut url = Url::parse(&self.repo_url(&repo.name, "/contents"))
            .map_err(|e| HostError::InvalidRequest(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| HostError::InvalidRequest(format!("cannot-be-a-base URL for {path}")))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn put_contents(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<(), HostError> {
        let mut body = serde_json::json!({
            "message": message,
            "content": BASE64_STANDARD.encode(content),
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        let response = self
            .client
            .put(self.contents_url(repo, path)?)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(HostError::Conflict { path: path.into() }),
            status => {
                let body = response.text().await.unwrap_or_default();
                let operation = if sha.is_some() { "update_file" } else { "create_file" };
                Err(HostError::status(operation, status.as_u16(), &body))
            }
        }
    }
}

#[async_trait]
impl RepositoryHost for GitHubHost {
    async fn get_repository(&self, name: &str) -> Result<Lookup<Repository>, HostError> {
        let response = self.client.get(self.repo_url(name, "")).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Lookup::Found(read_json("get_repository", response).await?)),
            StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HostError::status("get_repository", status.as_u16(), &body))
            }
        }
    }

    async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Repository, HostError> {
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "private": false,
            "auto_init": false,
        });
        let response = self
            .client
            .post(format!("{}/user/repos", self.api_url))
            .json(&body)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(HostError::status("create_repository", status, &body));
        }
        read_json("create_repository", response).await
    }

    async fn get_file(
        &self,
        repo: &Repository,
        path: &str,
    ) -> Result<Lookup<RemoteFile>, HostError> {
        let response = self.client.get(self.contents_url(repo, path)?).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Lookup::Found(read_json("get_file", response).await?)),
            StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HostError::status("get_file", status.as_u16(), &body))
            }
        }
    }

    async fn create_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), HostError> {
        self.put_contents(repo, path, content, message, None).await
    }

    async fn update_file(
        &self,
        repo: &Repository,
        path: &str,
        content: &[u8],
        message: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        self.put_contents(repo, path, content, message, Some(sha))
            .await
    }

    async fn enable_pages(&self, repo_name: &str, branch: &str) -> Result<PagesStatus, HostError> {
        let body = serde_json::json!({ "source": { "branch": branch, "path": "/" } });
        let response = self
            .client
            .post(self.repo_url(repo_name, "/pages"))
            .json(&body)
            .send()
            .await?;

        Ok(match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => PagesStatus::Enabled,
            StatusCode::CONFLICT => PagesStatus::AlreadyEnabled,
            status => PagesStatus::Rejected(status.as_u16()),
        })
    }

    async fn latest_commit(&self, repo: &Repository) -> Result<Option<String>, HostError> {
        let response = self
            .client
            .get(self.repo_url(&repo.name, "/commits"))
            .query(&[("per_page", "1")])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let commits: Vec<CommitEntry> = read_json("latest_commit", response).await?;
                Ok(commits.into_iter().next().map(|c| c.sha))
            }
            // GitHub answers 409 for a repository without commits.
            StatusCode::CONFLICT => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HostError::status("latest_commit", status.as_u16(), &body))
            }
        }
    }
}
