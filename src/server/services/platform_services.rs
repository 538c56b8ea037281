use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use mockall::automock;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error, info};
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::services::allowlist_services::normalize_host;
use crate::server::utils::url_utils::parse_target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    Twitch,
    Dailymotion,
    Vimeo,
    Kick,
}

impl Platform {
    const DOMAINS: [(&'static str, Platform); 8] = [
        ("youtube.com", Platform::YouTube),
        ("youtu.be", Platform::YouTube),
        ("twitch.tv", Platform::Twitch),
        ("dailymotion.com", Platform::Dailymotion),
        ("dai.ly", Platform::Dailymotion),
        ("vimeo.com", Platform::Vimeo),
        ("kick.com", Platform::Kick),
        ("youtube-nocookie.com", Platform::YouTube),
    ];

    /// page urls only, a `.m3u8` on a platform host is already a manifest
    pub fn detect(url: &Url) -> Option<Self> {
        if url.path().to_ascii_lowercase().ends_with(".m3u8") {
            return None;
        }
        let host = normalize_host(url.host_str()?);
        Self::DOMAINS
            .iter()
            .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
            .map(|(_, platform)| *platform)
    }
}

/// the part of yt-dlp's `--dump-single-json` output we look at
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub live_status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub formats: Vec<VideoFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoFormat {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl VideoMetadata {
    pub fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false) || self.live_status.as_deref() == Some("is_live")
    }
}

impl VideoFormat {
    pub fn is_hls(&self) -> bool {
        self.protocol.as_deref().is_some_and(|p| p.contains("m3u8"))
            || self.url.as_deref().is_some_and(|u| u.contains(".m3u8"))
    }
}

/// live master manifest, then the last (best) hls variant, then a top level manifest url
pub fn select_hls(metadata: &VideoMetadata) -> Option<String> {
    let hls: Vec<&VideoFormat> = metadata.formats.iter().filter(|f| f.is_hls()).collect();

    if metadata.is_live() {
        if let Some(master) = hls.iter().find_map(|f| f.manifest_url.clone()) {
            return Some(master);
        }
    }

    if let Some(best) = hls
        .last()
        .and_then(|f| f.url.clone().or_else(|| f.manifest_url.clone()))
    {
        return Some(best);
    }

    [&metadata.manifest_url, &metadata.url]
        .into_iter()
        .flatten()
        .find(|u| u.contains(".m3u8"))
        .cloned()
}

pub type DynMetadataExtractor = Arc<dyn MetadataExtractor + Send + Sync>;

#[automock]
#[async_trait::async_trait]
pub trait MetadataExtractor {
    async fn extract(&self, page_url: &Url) -> anyhow::Result<VideoMetadata>;
}

/// shells out to yt-dlp, one process per page url
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl MetadataExtractor for YtDlpExtractor {
    async fn extract(&self, page_url: &Url) -> anyhow::Result<VideoMetadata> {
        let output = Command::new(&self.binary)
            .args(["--dump-single-json", "--no-playlist", "--no-warnings"])
            .arg(page_url.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("yt-dlp printed something that isn't metadata")
    }
}

/// turns platform page urls into something a player can open
pub struct PlatformResolver {
    extractor: DynMetadataExtractor,
    timeout: Duration,
}

impl PlatformResolver {
    pub fn new(extractor: DynMetadataExtractor, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    /// `None` when the url isn't a platform page and should be fetched as-is
    pub async fn resolve(&self, url: &Url) -> AppResult<Option<Url>> {
        let Some(platform) = Platform::detect(url) else {
            return Ok(None);
        };

        info!("Resolving {:?} page {}", platform, url);

        let metadata = tokio::time::timeout(self.timeout, self.extractor.extract(url))
            .await
            .map_err(|_| {
                error!("Metadata extraction for {} timed out", url);
                Error::Timeout
            })?
            .map_err(|e| {
                error!("Metadata extraction for {} failed: {:#}", url, e);
                Error::Platform(format!("{:?} extraction failed", platform))
            })?;

        let manifest = select_hls(&metadata).ok_or_else(|| {
            debug!("No hls format among {} formats", metadata.formats.len());
            Error::NotFound(format!("no hls stream for {}", url))
        })?;

        let resolved = parse_target(&manifest)
            .map_err(|_| Error::Platform(format!("extractor returned a bad url for {}", url)))?;

        debug!("{} resolved to {}", url, resolved);
        Ok(Some(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=abc", Some(Platform::YouTube))]
    #[case("https://youtu.be/abc", Some(Platform::YouTube))]
    #[case("https://m.twitch.tv/somechannel", Some(Platform::Twitch))]
    #[case("https://www.dailymotion.com/video/x8", Some(Platform::Dailymotion))]
    #[case("https://player.vimeo.com/video/1", Some(Platform::Vimeo))]
    #[case("https://kick.com/someone", Some(Platform::Kick))]
    #[case("https://notyoutube.com/watch", None)]
    #[case("https://cdn.example/live.m3u8", None)]
    fn detects_platforms(#[case] url: &str, #[case] expected: Option<Platform>) {
        assert_eq!(Platform::detect(&Url::parse(url).unwrap()), expected);
    }

    fn format(url: &str, manifest: Option<&str>) -> VideoFormat {
        VideoFormat {
            format_id: None,
            url: Some(url.to_string()),
            manifest_url: manifest.map(|m| m.to_string()),
            protocol: Some("m3u8_native".to_string()),
        }
    }

    #[test]
    fn live_prefers_the_master_manifest() {
        let metadata = VideoMetadata {
            is_live: Some(true),
            formats: vec![
                format("https://v.example/360.m3u8", Some("https://v.example/master.m3u8")),
                format("https://v.example/1080.m3u8", Some("https://v.example/master.m3u8")),
            ],
            ..Default::default()
        };
        assert_eq!(
            select_hls(&metadata).as_deref(),
            Some("https://v.example/master.m3u8")
        );
    }

    #[test]
    fn vod_takes_the_last_hls_variant() {
        let metadata = VideoMetadata {
            formats: vec![
                VideoFormat {
                    url: Some("https://v.example/dash.mp4".to_string()),
                    protocol: Some("https".to_string()),
                    ..Default::default()
                },
                format("https://v.example/360.m3u8", None),
                format("https://v.example/1080.m3u8", None),
            ],
            ..Default::default()
        };
        assert_eq!(
            select_hls(&metadata).as_deref(),
            Some("https://v.example/1080.m3u8")
        );
    }

    #[test]
    fn falls_back_to_top_level_manifest() {
        let metadata = VideoMetadata {
            url: Some("https://v.example/only.m3u8".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select_hls(&metadata).as_deref(),
            Some("https://v.example/only.m3u8")
        );

        let nothing = VideoMetadata {
            url: Some("https://v.example/progressive.mp4".to_string()),
            ..Default::default()
        };
        assert!(select_hls(&nothing).is_none());
    }
}
