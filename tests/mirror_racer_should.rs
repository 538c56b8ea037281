use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use url::Url;

use stream_relay::catalog::StaticChannelCatalog;
use stream_relay::server::error::{AppResult, Error};
use stream_relay::server::services::allowlist_services::HostAllowlist;
use stream_relay::server::services::gatekeeper_services::GatekeeperResolver;
use stream_relay::server::services::mirror_services::{MirrorRacer, ProbeOutcome};
use stream_relay::server::services::upstream_services::{
    UpstreamFetcher, UpstreamRequest, UpstreamResponse,
};

/// answers per host after a fixed delay, the mock can't sleep so this one does
struct SlowUpstream {
    hosts: HashMap<&'static str, (Duration, StatusCode, &'static str)>,
    calls: AtomicUsize,
}

impl SlowUpstream {
    fn new(hosts: &[(&'static str, u64, StatusCode, &'static str)]) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|(host, ms, status, ct)| (*host, (Duration::from_millis(*ms), *status, *ct)))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamFetcher for SlowUpstream {
    async fn send(&self, request: UpstreamRequest) -> AppResult<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let host = request.url.host_str().unwrap_or_default().to_string();
        let Some((delay, status, content_type)) = self.hosts.get(host.as_str()).copied() else {
            return Err(Error::UpstreamUnreachable(host));
        };

        tokio::time::sleep(delay).await;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(UpstreamResponse {
            status,
            headers,
            url: request.url,
            body: Body::empty(),
        })
    }
}

const HOSTS: [&str; 4] = ["a.example", "b.example", "c.example", "d.example"];

fn racer(upstream: Arc<SlowUpstream>, deadline_ms: u64) -> MirrorRacer {
    let allowlist = Arc::new(HostAllowlist::new(
        Arc::new(StaticChannelCatalog::default()),
        HOSTS.iter().map(|h| h.to_string()).collect(),
        false,
    ));
    let fetcher = Arc::new(GatekeeperResolver::new(
        upstream,
        allowlist.clone(),
        &[".php".to_string()],
        5,
        Duration::from_secs(10),
    ));
    MirrorRacer::new(fetcher, allowlist, Duration::from_millis(deadline_ms))
}

fn urls(hosts: &[&str]) -> Vec<Url> {
    hosts
        .iter()
        .map(|h| Url::parse(&format!("https://{}/live/index.m3u8", h)).unwrap())
        .collect()
}

const MPEGURL: &str = "application/vnd.apple.mpegurl";

#[tokio::test]
async fn test_picks_the_only_working_mirror() {
    let upstream = Arc::new(SlowUpstream::new(&[
        ("a.example", 5, StatusCode::NOT_FOUND, "text/html"),
        ("b.example", 50, StatusCode::OK, MPEGURL),
        ("c.example", 10_000, StatusCode::OK, MPEGURL),
    ]));

    let winner = racer(upstream, 1_000)
        .race(
            urls(&["a.example", "b.example", "c.example"]),
            &HeaderMap::new(),
            false,
        )
        .await
        .unwrap();

    assert_eq!(winner.url.host_str(), Some("b.example"));
    assert!(matches!(winner.outcome, ProbeOutcome::Success(_)));
}

#[tokio::test]
async fn test_fastest_working_mirror_wins() {
    let upstream = Arc::new(SlowUpstream::new(&[
        ("a.example", 400, StatusCode::OK, MPEGURL),
        ("b.example", 10, StatusCode::OK, "application/octet-stream"),
    ]));

    let winner = racer(upstream, 2_000)
        .race(urls(&["a.example", "b.example"]), &HeaderMap::new(), false)
        .await
        .unwrap();

    assert_eq!(winner.url.host_str(), Some("b.example"));
}

#[tokio::test]
async fn test_no_working_mirror_is_none_available() {
    let upstream = Arc::new(SlowUpstream::new(&[
        ("a.example", 5, StatusCode::SERVICE_UNAVAILABLE, "text/html"),
        // answers fine but with html, a login wall most likely
        ("b.example", 5, StatusCode::OK, "text/html"),
    ]));

    let result = racer(upstream, 1_000)
        .race(
            urls(&["a.example", "b.example", "d.example"]),
            &HeaderMap::new(),
            false,
        )
        .await;

    assert!(matches!(result, Err(Error::NoneAvailable)));
}

#[tokio::test]
async fn test_deadline_is_shared_by_every_probe() {
    let upstream = Arc::new(SlowUpstream::new(&[
        ("a.example", 5_000, StatusCode::OK, MPEGURL),
        ("b.example", 5_000, StatusCode::OK, MPEGURL),
    ]));

    let started = std::time::Instant::now();
    let result = racer(upstream, 100)
        .race(urls(&["a.example", "b.example"]), &HeaderMap::new(), false)
        .await;

    assert!(matches!(result, Err(Error::NoneAvailable)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_primary_must_pass_the_allowlist() {
    let upstream = Arc::new(SlowUpstream::new(&[("a.example", 5, StatusCode::OK, MPEGURL)]));

    let result = racer(upstream.clone(), 1_000)
        .race(urls(&["evil.example", "a.example"]), &HeaderMap::new(), false)
        .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unlisted_backups_are_skipped_and_duplicates_probed_once() {
    let upstream = Arc::new(SlowUpstream::new(&[(
        "a.example",
        5,
        StatusCode::NOT_FOUND,
        "text/html",
    )]));

    let result = racer(upstream.clone(), 1_000)
        .race(
            urls(&["a.example", "evil.example", "a.example", "127.0.0.1"]),
            &HeaderMap::new(),
            false,
        )
        .await;

    assert!(matches!(result, Err(Error::NoneAvailable)));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}
