use anyhow::Result;
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// how the `Origin` header is produced for a channel
///
/// some origins reject any request carrying a mismatched origin while others refuse requests
/// without one, and which is which was only ever found out by trying, so it lives on the
/// channel instead of being a global rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginPolicy {
    /// scheme://host[:port] of the referer, nothing when there is no referer
    #[default]
    FromReferer,
    /// never send an origin
    Omit,
    /// always send this exact value
    Fixed(String),
}

/// one entry of the channel list
///
/// title and category are only here so the same file can feed a channel browser, the relay
/// only cares about the url, the disguise fields and the backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub origin: OriginPolicy,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub backups: Vec<String>,
    // the url is a script that answers with a redirect to the real manifest
    #[serde(default)]
    pub gatekeeper: bool,
}

impl Channel {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            category: None,
            url: url.into(),
            referer: None,
            origin: OriginPolicy::default(),
            user_agent: None,
            accept_language: None,
            backups: Vec::new(),
            gatekeeper: false,
        }
    }

    /// primary url followed by the backups, in catalog order
    pub fn candidate_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.backups.iter().map(|b| b.as_str()))
    }
}

pub type DynChannelCatalog = Arc<dyn ChannelCatalog + Send + Sync>;

/// the only thing the relay needs from whatever owns the channel metadata
#[automock]
#[async_trait::async_trait]
pub trait ChannelCatalog {
    async fn list_channels(&self) -> Result<Vec<Channel>>;
}

/// in-memory catalog, used when no catalog file is configured and in tests
#[derive(Debug, Clone, Default)]
pub struct StaticChannelCatalog {
    channels: Vec<Channel>,
}

impl StaticChannelCatalog {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }
}

#[async_trait::async_trait]
impl ChannelCatalog for StaticChannelCatalog {
    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.clone())
    }
}
