//! Artifact fetching with an origin allowlist.
//!
//! Security model:
//! - Only URLs matching allowed origins can be fetched
//! - Redirects only followed if they stay within the same origin
//! - `file://` locations are read only when explicitly enabled

use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Maximum number of same-origin redirects followed for one artifact
const MAX_REDIRECTS: usize = 5;

/// Source of library and type-declaration artifacts.
#[async_trait(?Send)]
pub trait ArtifactFetcher {
    /// Fetch the artifact at `location` as text.
    async fn fetch_text(&self, location: &str) -> SandboxResult<String>;
}

/// Configuration for fetch allowlist
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    /// Allowed origins (e.g., "https://cdn.jsdelivr.net")
    /// An origin is scheme + host + port
    pub allowed_origins: Vec<String>,
    pub allow_file_urls: bool,
    /// Upper bound for one HTTP request, connection to last body byte
    pub timeout: Option<Duration>,
}

impl FetchConfig {
    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        if url.scheme() == "file" {
            return self.allow_file_urls;
        }
        if self.allowed_origins.is_empty() {
            return false;
        }
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
    }
}

/// Fetches artifacts over HTTP(S) or from the local filesystem.
pub struct HttpFetcher {
    config: FetchConfig,
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> SandboxResult<Self> {
        let mut builder = Client::builder()
            // Don't follow redirects automatically - we'll handle them manually
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SandboxError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn fetch_url(&self, url: Url) -> SandboxResult<String> {
        let mut current = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| fetch_error(&current, e))?;

            let status = response.status();

            // Handle redirects manually - only allow same-origin
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| fetch_error(&current, "redirect without a valid location"))?;
                let redirect_url = current
                    .join(location)
                    .map_err(|e| fetch_error(&current, format!("invalid redirect URL: {}", e)))?;

                if redirect_url.origin() != url.origin() {
                    return Err(fetch_error(
                        &current,
                        format!(
                            "redirect to different origin '{}'",
                            redirect_url.origin().ascii_serialization()
                        ),
                    ));
                }

                tracing::debug!(from = %current, to = %redirect_url, "following redirect");
                current = redirect_url;
                continue;
            }

            if !status.is_success() {
                return Err(fetch_error(
                    &current,
                    format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ),
                ));
            }

            return response
                .text()
                .await
                .map_err(|e| fetch_error(&current, format!("failed to read body: {}", e)));
        }

        Err(fetch_error(&url, "too many redirects"))
    }

    async fn read_file(&self, url: &Url) -> SandboxResult<String> {
        let path = url
            .to_file_path()
            .map_err(|_| fetch_error(url, "not a local path"))?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| fetch_error(url, e))
    }
}

#[async_trait(?Send)]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch_text(&self, location: &str) -> SandboxResult<String> {
        let url = Url::parse(location).map_err(|e| SandboxError::Fetch {
            location: location.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;

        if !self.config.is_origin_allowed(&url) {
            return Err(SandboxError::OriginBlocked {
                origin: url.origin().ascii_serialization(),
            });
        }

        match url.scheme() {
            "file" => self.read_file(&url).await,
            "http" | "https" => self.fetch_url(url).await,
            other => Err(fetch_error(&url, format!("unsupported scheme '{}'", other))),
        }
    }
}

fn fetch_error(url: &Url, reason: impl ToString) -> SandboxError {
    SandboxError::Fetch {
        location: url.to_string(),
        reason: reason.to_string(),
    }
}
