use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

use super::channel::{Channel, ChannelCatalog};

/// reads the channel list from a json array on disk every time it's asked
///
/// the allowlist only asks once (and again on reload) so there's no point caching here
#[derive(Debug, Clone)]
pub struct FileChannelCatalog {
    path: PathBuf,
}

impl FileChannelCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ChannelCatalog for FileChannelCatalog {
    async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read channel catalog {}", self.path.display()))?;

        let channels: Vec<Channel> = serde_json::from_str(&raw).with_context(|| {
            format!("failed to parse channel catalog {}", self.path.display())
        })?;

        info!(
            "loaded {} channels from {}",
            channels.len(),
            self.path.display()
        );

        Ok(channels)
    }
}
