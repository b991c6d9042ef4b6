use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Generative backend endpoint. Absent when no API key is configured.
#[derive(Debug, Clone)]
pub struct GeminiEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Top-level deployer configuration.
///
/// Built once at startup and handed to each component, so tests can run
/// side by side with different credentials.
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub github_token: String,
    /// Account that owns every task repository.
    pub github_owner: String,
    pub github_api_url: String,
    /// Branch the static site is served from.
    pub pages_branch: String,
    pub gemini: Option<GeminiEndpoint>,
    /// Shared secret checked by the inbound endpoint (required for `serve`).
    pub user_secret: Option<String>,
    pub bind_addr: SocketAddr,
    /// Scratch area for decoded attachments, shared by all runs.
    pub scratch_dir: PathBuf,
    /// Pause between enabling hosting and resolving the latest commit.
    pub settle_delay: Duration,
    pub notify_max_attempts: u32,
    /// First retry delay; doubles after every failed attempt.
    pub notify_initial_delay: Duration,
    /// Per-request timeout for every outbound HTTP call.
    pub http_timeout: Duration,
}

/// On-disk form of [`DeployerConfig`]. Every field is optional; unset fields
/// come from the environment or defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    github_token: Option<String>,
    github_owner: Option<String>,
    github_api_url: Option<String>,
    pages_branch: Option<String>,
    gemini_api_key: Option<String>,
    gemini_model: Option<String>,
    gemini_api_url: Option<String>,
    user_secret: Option<String>,
    bind_addr: Option<String>,
    scratch_dir: Option<PathBuf>,
    settle_delay_secs: Option<u64>,
    notify_max_attempts: Option<u32>,
    notify_initial_delay_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
}

impl DeployerConfig {
    /// Config with defaults for everything except the GitHub identity.
    pub fn new(github_token: impl Into<String>, github_owner: impl Into<String>) -> Self {
        Self {
            github_token: github_token.into(),
            github_owner: github_owner.into(),
            github_api_url: DEFAULT_GITHUB_API_URL.into(),
            pages_branch: "main".into(),
            gemini: None,
            user_secret: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            scratch_dir: std::env::temp_dir().join("attachments"),
            settle_delay: Duration::from_secs(10),
            notify_max_attempts: 5,
            notify_initial_delay: Duration::from_secs(2),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::resolve(FileConfig::default(), |key| std::env::var(key).ok())
    }

    /// Load from a TOML file, filling unset fields from the environment.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content, |key| std::env::var(key).ok())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub(crate) fn from_toml_str(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file: FileConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        Self::resolve(file, env)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |value: Option<String>, var: &str| {
            value
                .or_else(|| env(var))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{var} is not set"))
        };
        let secs = |value: Option<u64>, var: &str, default: u64| -> Result<Duration> {
            let secs = match value {
                Some(v) => v,
                None => match env(var) {
                    Some(raw) => raw
                        .parse()
                        .with_context(|| format!("{var} must be a whole number of seconds"))?,
                    None => default,
                },
            };
            Ok(Duration::from_secs(secs))
        };

        let github_token = required(file.github_token, "GITHUB_TOKEN")?;
        let github_owner = required(file.github_owner, "GITHUB_USERNAME")?;
        let mut config = Self::new(github_token, github_owner);

        if let Some(url) = file.github_api_url.or_else(|| env("GITHUB_API_URL")) {
            config.github_api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(branch) = file.pages_branch.or_else(|| env("DEPLOYER_PAGES_BRANCH")) {
            config.pages_branch = branch;
        }

        config.gemini = file
            .gemini_api_key
            .or_else(|| env("GEMINI_API_KEY"))
            .filter(|key| !key.is_empty())
            .map(|api_key| GeminiEndpoint {
                url: file
                    .gemini_api_url
                    .or_else(|| env("GEMINI_API_URL"))
                    .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.into())
                    .trim_end_matches('/')
                    .to_string(),
                model: file
                    .gemini_model
                    .or_else(|| env("GEMINI_MODEL"))
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
                api_key,
            });

        config.user_secret = file
            .user_secret
            .or_else(|| env("USER_SECRET"))
            .filter(|s| !s.is_empty());

        let bind = file
            .bind_addr
            .or_else(|| env("DEPLOYER_BIND"))
            .unwrap_or_else(|| DEFAULT_BIND.into());
        config.bind_addr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {bind}"))?;

        if let Some(dir) = file
            .scratch_dir
            .or_else(|| env("DEPLOYER_SCRATCH_DIR").map(PathBuf::from))
        {
            config.scratch_dir = dir;
        }

        config.settle_delay = secs(file.settle_delay_secs, "DEPLOYER_SETTLE_SECS", 10)?;
        config.notify_initial_delay = secs(
            file.notify_initial_delay_secs,
            "DEPLOYER_NOTIFY_DELAY_SECS",
            2,
        )?;
        config.http_timeout = secs(file.http_timeout_secs, "DEPLOYER_HTTP_TIMEOUT_SECS", 30)?;
        config.notify_max_attempts = match file.notify_max_attempts {
            Some(n) => n,
            None => match env("DEPLOYER_NOTIFY_ATTEMPTS") {
                Some(raw) => raw
                    .parse()
                    .context("DEPLOYER_NOTIFY_ATTEMPTS must be a positive integer")?,
                None => 5,
            },
        };

        Ok(config)
    }

    /// Public URL of the static site for `task`.
    pub fn pages_url(&self, task: &str) -> String {
        format!("https://{}.github.io/{}/", self.github_owner, task)
    }
}
