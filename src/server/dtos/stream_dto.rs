use serde::{Deserialize, Serialize};
use validator::Validate;

/// query string of `/streams` and `/streams/resolve`
///
/// also what a rewritten manifest line turns back into, so every field here has to survive a
/// round trip through `proxy_url`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    #[validate(length(min = 1, message = "url is required"))]
    pub url: String,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub x_forwarded_for: Option<String>,
    pub channel: Option<String>,
    // repeated `backups=` params
    #[serde(default)]
    pub backups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub stream_url: String,
}
