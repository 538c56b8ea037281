use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, header};
use tracing::{debug, error, warn};
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::services::allowlist_services::HostAllowlist;
use crate::server::services::upstream_services::{
    DynUpstreamFetcher, UpstreamRequest, UpstreamResponse,
};
use crate::server::utils::url_utils::resolve_reference;

/// where a fetch is at
///
/// `Direct` and `Resolving` follow plain 3xx hops through the gate until `max_redirects`,
/// `Gatekeeper` is the one hop where a redirect is the expected answer.
enum FetchState {
    Direct(Url),
    Gatekeeper(Url),
    AwaitingRedirect(UpstreamResponse),
    Resolving(Url),
    Done(UpstreamResponse),
}

/// fetches a target with manual redirects, re-validating every hop against the allowlist
pub struct GatekeeperResolver {
    upstream: DynUpstreamFetcher,
    allowlist: Arc<HostAllowlist>,
    extensions: Vec<String>,
    max_redirects: usize,
    timeout: Duration,
}

impl GatekeeperResolver {
    pub fn new(
        upstream: DynUpstreamFetcher,
        allowlist: Arc<HostAllowlist>,
        extensions: &[String],
        max_redirects: usize,
        timeout: Duration,
    ) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .map(|e| if e.starts_with('.') { e } else { format!(".{}", e) })
            .collect();

        Self {
            upstream,
            allowlist,
            extensions,
            max_redirects,
            timeout,
        }
    }

    /// script-looking path, `/auth.php?id=1` and friends
    pub fn is_gatekeeper(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    /// same headers on every hop, the gatekeeper and the cdn behind it usually check that
    /// the referer didn't change in between
    pub async fn fetch(
        &self,
        method: Method,
        target: Url,
        headers: &HeaderMap,
        gatekeeper: bool,
    ) -> AppResult<UpstreamResponse> {
        let mut state = if gatekeeper || self.is_gatekeeper(&target) {
            FetchState::Gatekeeper(target)
        } else {
            FetchState::Direct(target)
        };
        let mut hops = 0;

        loop {
            state = match state {
                FetchState::Gatekeeper(url) => {
                    debug!("Asking gatekeeper {} for the real location", url);
                    let response = self.send(method.clone(), url, headers).await?;
                    FetchState::AwaitingRedirect(response)
                }
                FetchState::AwaitingRedirect(response) => {
                    if response.status.is_success() {
                        // nothing to resolve, the script served the content itself
                        debug!("Gatekeeper {} answered with content", response.url);
                        FetchState::Done(response)
                    } else if response.status.is_redirection() {
                        let next = self.location(&response).ok_or_else(|| {
                            error!("Gatekeeper {} redirected without a location", response.url);
                            Error::Gatekeeper("redirect without a location".to_string())
                        })?;
                        self.allowlist.check_redirect(&next).await?;
                        debug!("Gatekeeper {} resolved to {}", response.url, next);
                        FetchState::Resolving(next)
                    } else {
                        error!(
                            "Gatekeeper {} answered {} instead of a redirect",
                            response.url, response.status
                        );
                        return Err(Error::Gatekeeper(format!(
                            "gatekeeper answered {}",
                            response.status
                        )));
                    }
                }
                FetchState::Direct(url) | FetchState::Resolving(url) => {
                    let response = self.send(method.clone(), url, headers).await?;
                    if !response.status.is_redirection() {
                        FetchState::Done(response)
                    } else {
                        hops += 1;
                        if hops > self.max_redirects {
                            warn!(
                                "Gave up on {} after {} redirects",
                                response.url, self.max_redirects
                            );
                            return Err(Error::UpstreamUnreachable(
                                "too many redirects".to_string(),
                            ));
                        }

                        let next = self
                            .location(&response)
                            .ok_or(Error::Upstream(response.status))?;
                        self.allowlist.check_redirect(&next).await?;
                        debug!("Following redirect {} -> {}", response.url, next);
                        FetchState::Direct(next)
                    }
                }
                FetchState::Done(response) => {
                    if !response.status.is_success() {
                        debug!("Upstream {} answered {}", response.url, response.status);
                        return Err(Error::Upstream(response.status));
                    }
                    return Ok(response);
                }
            };
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: &HeaderMap,
    ) -> AppResult<UpstreamResponse> {
        self.upstream
            .send(UpstreamRequest {
                method,
                url,
                headers: headers.clone(),
                timeout: self.timeout,
            })
            .await
    }

    fn location(&self, response: &UpstreamResponse) -> Option<Url> {
        let location = response.header_str(header::LOCATION)?;
        resolve_reference(&response.url, location)
            .filter(|next| matches!(next.scheme(), "http" | "https"))
    }
}
