use axum::{
    Json, Router,
    body::to_bytes,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error};
use url::Url;

use crate::server::{
    dtos::stream_dto::ResolveResponse,
    error::{AppResult, Error},
    extractors::StreamRequest,
    services::{
        proxy_services::{ProxyServices, ResolvedTarget},
        upstream_services::UpstreamResponse,
    },
    utils::{
        classify_utils::{ContentKind, classify, looks_like_manifest},
        encoding_utils::{AcceptEncoding, ContentEncoding, MANIFEST_ACCEPT_ENCODING},
        manifest_utils::ManifestRewriter,
    },
};

/// playlists bigger than this are not playlists
pub const MAX_MANIFEST_BYTES: usize = 16 * 1024 * 1024;

const MPEGURL: &str = "application/vnd.apple.mpegurl";

const FORWARDED_HEADERS: [HeaderName; 8] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CONTENT_ENCODING,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
];

fn static_header(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

pub struct StreamController;

impl StreamController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::stream).options(Self::preflight))
            .route("/resolve", get(Self::resolve).options(Self::preflight))
    }

    /// `OPTIONS` without the cors layer answering first, some players probe like this
    async fn preflight() -> Response {
        (
            StatusCode::NO_CONTENT,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, static_header("*")),
                (
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    static_header("GET, HEAD, OPTIONS"),
                ),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, static_header("*")),
                (header::ACCESS_CONTROL_MAX_AGE, static_header("86400")),
            ],
        )
            .into_response()
    }

    async fn resolve(request: StreamRequest) -> AppResult<Json<ResolveResponse>> {
        let target = request.services.resolve_target(&request.query).await?;
        debug!("Resolved {} to {}", request.query.url, target.url);

        Ok(Json(ResolveResponse {
            stream_url: target.url.to_string(),
        }))
    }

    async fn stream(request: StreamRequest) -> AppResult<Response> {
        let StreamRequest {
            query,
            method,
            range,
            accept_encoding,
            services,
        } = request;

        let target = services.resolve_target(&query).await?;
        let client_encoding = AcceptEncoding::parse(accept_encoding.as_deref());

        // playlists get decoded and re-encoded here, anything else reaches the client as
        // upstream sent it so upstream only gets to pick from what the client takes
        let expects_manifest = target.gatekeeper
            || services.fetcher.is_gatekeeper(&target.url)
            || looks_like_manifest(&target.url);
        let upstream_encoding = if expects_manifest {
            MANIFEST_ACCEPT_ENCODING.to_string()
        } else {
            client_encoding.upstream_value()
        };
        let headers = target.disguise.headers(range.as_ref(), &upstream_encoding);
        let upstream_method = if method == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };

        debug!("Fetching {} {}", upstream_method, target.url);
        let response = services
            .fetcher
            .fetch(upstream_method, target.url.clone(), &headers, target.gatekeeper)
            .await?;

        let kind = classify(
            response.header_str(header::CONTENT_TYPE),
            &target.url,
            &response.url,
        );
        debug!("Classified {} as {:?}", response.url, kind);

        match kind {
            ContentKind::Manifest if method != Method::HEAD => {
                Self::manifest_response(&services, &target, response, &client_encoding).await
            }
            ContentKind::Manifest => Ok(Self::passthrough_response(response, true)),
            ContentKind::Binary => Ok(Self::passthrough_response(response, false)),
        }
    }

    async fn manifest_response(
        services: &ProxyServices,
        target: &ResolvedTarget,
        response: UpstreamResponse,
        client_encoding: &AcceptEncoding,
    ) -> AppResult<Response> {
        let encoding = ContentEncoding::from_content_encoding(
            response.header_str(header::CONTENT_ENCODING),
        )
        .ok_or_else(|| {
            error!(
                "Manifest {} came back with an encoding we can't undo",
                response.url
            );
            Error::UpstreamUnreachable("unsupported manifest encoding".to_string())
        })?;
        let base = response.url.clone();

        let raw = tokio::time::timeout(
            services.config.upstream_timeout(),
            to_bytes(response.body, MAX_MANIFEST_BYTES),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| {
            error!("Failed to read manifest {}: {}", base, e);
            Error::UpstreamUnreachable("manifest unreadable or too large".to_string())
        })?;

        let decoded = encoding.decompress(&raw, MAX_MANIFEST_BYTES).map_err(|e| {
            error!("Failed to decompress {:?} manifest {}: {}", encoding, base, e);
            Error::UpstreamUnreachable("failed to decompress manifest".to_string())
        })?;
        if decoded.len() > MAX_MANIFEST_BYTES {
            error!("Manifest {} is over {} bytes decoded", base, MAX_MANIFEST_BYTES);
            return Err(Error::UpstreamUnreachable("manifest too large".to_string()));
        }

        let text = String::from_utf8(decoded).map_err(|e| {
            error!("Manifest {} is not UTF-8: {}", base, e);
            Error::UpstreamUnreachable("manifest is not UTF-8".to_string())
        })?;

        let snapshot = services.allowlist.snapshot().await?;
        let params = target.disguise.proxy_params();
        let rewriter = ManifestRewriter::new(
            &base,
            &params,
            services.config.manifest_host_policy,
            |url: &Url| services.allowlist.permits(&snapshot, url),
        );
        let rewritten = rewriter.rewrite(&text);

        Self::build_m3u8_response(&rewritten, client_encoding)
    }

    fn build_m3u8_response(body: &str, client_encoding: &AcceptEncoding) -> AppResult<Response> {
        let encoding = client_encoding.preferred();

        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::CONTENT_TYPE, static_header(MPEGURL));
        response_headers.insert(header::CACHE_CONTROL, static_header("no-cache"));
        response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, static_header("*"));

        let body = match encoding {
            ContentEncoding::Identity => body.as_bytes().to_vec(),
            coding => {
                let compressed = coding.compress(body.as_bytes()).map_err(|e| {
                    error!("Failed to compress manifest with {:?}: {}", coding, e);
                    Error::InternalServerErrorWithContext("Failed to compress response".to_string())
                })?;
                response_headers.insert(header::CONTENT_ENCODING, static_header(coding.token()));
                compressed
            }
        };

        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        Ok((StatusCode::OK, response_headers, body).into_response())
    }

    /// status and the allowed headers as-is, the body streams straight through
    fn passthrough_response(response: UpstreamResponse, manifest_head: bool) -> Response {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS.iter() {
            for value in response.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        if manifest_head {
            // the rewritten body has a different length than upstream's
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::CONTENT_ENCODING);
            headers.insert(header::CONTENT_TYPE, static_header(MPEGURL));
            headers.insert(header::CACHE_CONTROL, static_header("no-cache"));
        }

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, static_header("*"));

        (response.status, headers, response.body).into_response()
    }
}
