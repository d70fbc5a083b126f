use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Fetches the raw contract descriptor document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DescriptorLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<String>;
}

/// Fetches `http://` and `https://` paths over HTTP and reads anything else
/// from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    http: reqwest::Client,
}

impl SourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Failed to fetch {}", url))?;

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body of {}", url))
    }
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

#[async_trait]
impl DescriptorLoader for SourceLoader {
    async fn load(&self, path: &str) -> Result<String> {
        debug!(path, "loading contract descriptor");

        if is_remote(path) {
            return self.fetch(path).await;
        }

        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }
}
