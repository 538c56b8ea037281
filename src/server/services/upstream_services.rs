use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use mockall::automock;
use tracing::{debug, error};
use url::Url;

use crate::server::error::{AppResult, Error};

pub type DynUpstreamFetcher = Arc<dyn UpstreamFetcher + Send + Sync>;

/// one hop, redirects are never followed at this level
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Body,
}

impl UpstreamResponse {
    pub fn header_str(&self, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[automock]
#[async_trait::async_trait]
pub trait UpstreamFetcher {
    /// timeout covers everything up to the response head, the body streams for as long as
    /// the client keeps reading
    async fn send(&self, request: UpstreamRequest) -> AppResult<UpstreamResponse>;
}

pub struct ReqwestUpstream {
    http: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            // every hop goes back through the allowlist, so reqwest never follows on its own
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build the upstream http client")?;

        Ok(Self { http })
    }
}

fn map_reqwest_error(url: &Url, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        error!("Upstream {} timed out: {}", url, e);
        return Error::Timeout;
    }
    error!("Upstream {} unreachable: {}", url, e);
    Error::UpstreamUnreachable(url.host_str().unwrap_or_default().to_string())
}

#[async_trait::async_trait]
impl UpstreamFetcher for ReqwestUpstream {
    async fn send(&self, request: UpstreamRequest) -> AppResult<UpstreamResponse> {
        debug!("{} {}", request.method, request.url);

        let pending = self
            .http
            .request(request.method, request.url.clone())
            .headers(request.headers)
            .send();

        let response = tokio::time::timeout(request.timeout, pending)
            .await
            .map_err(|_| {
                error!(
                    "Upstream {} did not answer within {:?}",
                    request.url, request.timeout
                );
                Error::Timeout
            })?
            .map_err(|e| map_reqwest_error(&request.url, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        debug!("Upstream {} answered {}", url, status);

        Ok(UpstreamResponse {
            status,
            headers,
            url,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}
