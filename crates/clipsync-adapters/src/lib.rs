//! Remote clipping sources + the formatters that turn clippings into markdown.

pub mod format;
pub mod legacy;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clipsync_core::Clipping;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

pub use format::{materialize, twitter_clipping_to_markdown, Materialized};
pub use legacy::{legacy_notes, LegacyFeed, LegacyNote, LegacyTokenStatus, LegacyUserData};

pub const DEFAULT_API_BASE_URL: &str = "https://api.tressel.xyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("access token rejected: {reason}")]
    Auth { reason: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Server { status: u16, url: String, body: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Auth failures need the user to fix the token; everything else is
    /// worth another attempt on the next tick.
    pub fn retry_disposition(&self) -> RetryDisposition {
        if self.is_auth() {
            RetryDisposition::NonRetryable
        } else {
            RetryDisposition::Retryable
        }
    }
}

pub fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Pull capability consumed by the sync engine.
#[async_trait]
pub trait ClippingSource: Send + Sync {
    fn label(&self) -> &str;

    /// Clippings saved after `after` (a previous `saved_at`), or everything.
    async fn sync(&self, after: Option<&str>) -> Result<Vec<Clipping>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: Some(concat!("clipsync/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

/// HTTP client for the clipping service. Every request carries
/// `Authorization: Access <token>`; the token can be swapped at runtime.
#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<String>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, token: impl Into<String>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token.into()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let mut slot = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token.into();
    }

    fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Access {}", self.token()));
        if !query.is_empty() {
            request = request.query(query);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if is_auth_status(status) {
            return Err(SourceError::Auth {
                reason: format!("http {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Server {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|source| SourceError::Decode { url, source })
    }

    pub async fn ping(&self) -> Result<String, SourceError> {
        self.get_json("/ping", &[]).await
    }

    pub async fn verify_token(&self) -> Result<bool, SourceError> {
        match self.get_json::<bool>("/auth/verify-token", &[]).await {
            Err(SourceError::Auth { .. }) => Ok(false),
            other => other,
        }
    }
}

#[async_trait]
impl ClippingSource for ApiClient {
    fn label(&self) -> &str {
        "api"
    }

    async fn sync(&self, after: Option<&str>) -> Result<Vec<Clipping>, SourceError> {
        let query: Vec<(&str, &str)> = after.map(|after| ("after", after)).into_iter().collect();
        let clippings: Vec<Clipping> = self.get_json("/sync", &query).await?;
        info!(count = clippings.len(), after = after.unwrap_or("-"), "pulled clippings");
        Ok(clippings)
    }
}

/// Clippings read from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> anyhow::Result<Vec<Clipping>> {
        read_json_file(&self.path)
    }
}

#[async_trait]
impl ClippingSource for FixtureSource {
    fn label(&self) -> &str {
        "fixture"
    }

    async fn sync(&self, after: Option<&str>) -> Result<Vec<Clipping>, SourceError> {
        let mut clippings = self.load()?;
        if let Some(after) = after {
            clippings.retain(|clipping| clipping.saved_at.as_str() > after);
        }
        debug!(path = %self.path.display(), count = clippings.len(), "loaded fixture clippings");
        Ok(clippings)
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
