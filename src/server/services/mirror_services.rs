use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method, header};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, info, warn};
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::services::allowlist_services::HostAllowlist;
use crate::server::services::gatekeeper_services::GatekeeperResolver;
use crate::server::utils::classify_utils::{ContentKind, classify, is_generic_content_type};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success(Duration),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorCandidate {
    pub url: Url,
    pub outcome: ProbeOutcome,
}

/// HEADs every candidate at once and keeps the first one that answers like a stream
pub struct MirrorRacer {
    fetcher: Arc<GatekeeperResolver>,
    allowlist: Arc<HostAllowlist>,
    deadline: Duration,
}

impl MirrorRacer {
    pub fn new(
        fetcher: Arc<GatekeeperResolver>,
        allowlist: Arc<HostAllowlist>,
        deadline: Duration,
    ) -> Self {
        Self {
            fetcher,
            allowlist,
            deadline,
        }
    }

    /// `candidates[0]` is the primary, it failing the gate is a hard `Forbidden`, any other
    /// candidate failing it is just skipped
    pub async fn race(
        &self,
        candidates: Vec<Url>,
        headers: &HeaderMap,
        gatekeeper: bool,
    ) -> AppResult<MirrorCandidate> {
        let snapshot = self.allowlist.snapshot().await?;
        let mut seen = HashSet::new();
        let mut admitted = Vec::new();

        for (index, url) in candidates.into_iter().enumerate() {
            if !seen.insert(url.to_string()) {
                continue;
            }
            match self.allowlist.check_with(&snapshot, &url) {
                Ok(()) => admitted.push(url),
                Err(e) if index == 0 => return Err(e),
                Err(e) => debug!("Skipping mirror {}: {}", url, e),
            }
        }

        info!(
            "Racing {} mirrors with a {:?} deadline",
            admitted.len(),
            self.deadline
        );

        let mut probes: FuturesUnordered<_> = admitted
            .into_iter()
            .map(|url| self.probe(url, headers, gatekeeper))
            .collect();

        let winner = tokio::time::timeout(self.deadline, async {
            while let Some(candidate) = probes.next().await {
                match &candidate.outcome {
                    ProbeOutcome::Success(latency) => {
                        debug!("Mirror {} answered in {:?}", candidate.url, latency);
                        return Some(candidate);
                    }
                    ProbeOutcome::Failed(reason) => {
                        debug!("Mirror {} failed: {}", candidate.url, reason);
                    }
                }
            }
            None
        })
        .await;

        match winner {
            Ok(Some(candidate)) => {
                info!("Mirror {} won the race", candidate.url);
                Ok(candidate)
            }
            Ok(None) => {
                warn!("Every mirror failed, channel looks offline");
                Err(Error::NoneAvailable)
            }
            Err(_) => {
                warn!("No mirror answered within {:?}", self.deadline);
                Err(Error::NoneAvailable)
            }
        }
    }

    async fn probe(&self, url: Url, headers: &HeaderMap, gatekeeper: bool) -> MirrorCandidate {
        let started = Instant::now();
        let outcome = match self
            .fetcher
            .fetch(Method::HEAD, url.clone(), headers, gatekeeper)
            .await
        {
            Ok(response) => {
                let content_type = response.header_str(header::CONTENT_TYPE);
                if classify(content_type, &url, &response.url) == ContentKind::Manifest
                    || is_generic_content_type(content_type)
                {
                    ProbeOutcome::Success(started.elapsed())
                } else {
                    ProbeOutcome::Failed(format!(
                        "unexpected content type {}",
                        content_type.unwrap_or_default()
                    ))
                }
            }
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        };

        MirrorCandidate { url, outcome }
    }
}
