use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::catalog::DynChannelCatalog;
use crate::config::AppConfig;
use crate::server::dtos::stream_dto::StreamQuery;
use crate::server::error::AppResult;
use crate::server::services::{
    allowlist_services::HostAllowlist,
    disguise_services::Disguise,
    gatekeeper_services::GatekeeperResolver,
    mirror_services::MirrorRacer,
    platform_services::{DynMetadataExtractor, PlatformResolver, YtDlpExtractor},
    upstream_services::{DynUpstreamFetcher, ReqwestUpstream},
};
use crate::server::utils::{
    encoding_utils::MANIFEST_ACCEPT_ENCODING,
    url_utils::{decode_target, parse_target},
};

/// where a request ends up after allowlist, platform resolution and the mirror race
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub url: Url,
    pub disguise: Disguise,
    pub gatekeeper: bool,
}

/// everything a handler needs, cloned into each request through an `Extension`
#[derive(Clone)]
pub struct ProxyServices {
    pub allowlist: Arc<HostAllowlist>,
    pub fetcher: Arc<GatekeeperResolver>,
    pub mirrors: Arc<MirrorRacer>,
    pub platforms: Arc<PlatformResolver>,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>, catalog: DynChannelCatalog) -> anyhow::Result<Self> {
        info!("starting proxy services...");

        let upstream = Arc::new(ReqwestUpstream::new()?) as DynUpstreamFetcher;
        let extractor =
            Arc::new(YtDlpExtractor::new(config.yt_dlp_path.clone())) as DynMetadataExtractor;

        Ok(Self::with_collaborators(config, catalog, upstream, extractor))
    }

    /// same wiring as `new` with the network and the extractor swapped out
    pub fn with_collaborators(
        config: Arc<AppConfig>,
        catalog: DynChannelCatalog,
        upstream: DynUpstreamFetcher,
        extractor: DynMetadataExtractor,
    ) -> Self {
        let allowlist = Arc::new(HostAllowlist::new(
            catalog,
            config.allowed_hosts.clone(),
            config.trust_resolved_redirect_hosts,
        ));

        let fetcher = Arc::new(GatekeeperResolver::new(
            upstream,
            allowlist.clone(),
            &config.gatekeeper_extensions,
            config.max_redirects,
            config.upstream_timeout(),
        ));

        let mirrors = Arc::new(MirrorRacer::new(
            fetcher.clone(),
            allowlist.clone(),
            config.mirror_race_timeout(),
        ));

        let platforms = Arc::new(PlatformResolver::new(extractor, config.upstream_timeout()));

        info!("proxy services ok");

        Self {
            allowlist,
            fetcher,
            mirrors,
            platforms,
            config,
        }
    }

    /// allowlist -> disguise -> platform -> mirrors, everything before the real fetch
    pub async fn resolve_target(&self, query: &StreamQuery) -> AppResult<ResolvedTarget> {
        let mut url = parse_target(&decode_target(&query.url)?)?;

        let snapshot = self.allowlist.snapshot().await?;
        self.allowlist.check_with(&snapshot, &url)?;

        let channel = snapshot.channel_for(query.channel.as_deref(), &url);
        let disguise = Disguise::for_request(query, channel);
        // only the channel's own urls go through the gatekeeper hop, not its segments
        let gatekeeper = channel.is_some_and(|c| {
            c.gatekeeper
                && c.candidate_urls()
                    .any(|candidate| Url::parse(candidate).is_ok_and(|u| u == url))
        });

        if let Some(channel) = channel {
            debug!("Request matched channel {}", channel.id);
        }

        if let Some(resolved) = self.platforms.resolve(&url).await? {
            self.allowlist.check_redirect(&resolved).await?;
            url = resolved;
        }

        if !query.backups.is_empty() {
            let mut candidates = vec![url];
            candidates.extend(query.backups.iter().filter_map(|raw| {
                match decode_target(raw).and_then(|d| parse_target(&d)) {
                    Ok(backup) => Some(backup),
                    Err(e) => {
                        debug!("Ignoring unusable backup {}: {}", raw, e);
                        None
                    }
                }
            }));

            let probe_headers = disguise.headers(None, MANIFEST_ACCEPT_ENCODING);
            let winner = self
                .mirrors
                .race(candidates, &probe_headers, gatekeeper)
                .await?;
            url = winner.url;
        }

        Ok(ResolvedTarget {
            url,
            disguise,
            gatekeeper,
        })
    }
}
