use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashSet;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::catalog::{Channel, DynChannelCatalog};
use crate::server::error::{AppResult, Error};

/// lowercased with a leading `www.` dropped, so `WWW.Cdn.Example` and `cdn.example` match
pub fn normalize_host(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

fn is_local_ipv4(v4: &Ipv4Addr) -> bool {
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_broadcast()
        || v4.is_unspecified()
        // 100.64.0.0/10 (CGNAT)
        || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
}

fn is_local_ipv6(v6: &Ipv6Addr) -> bool {
    if let Some(mapped) = v6.to_ipv4_mapped() {
        return is_local_ipv4(&mapped);
    }
    v6.is_loopback()
        || v6.is_unspecified()
        // fc00::/7 (unique local)
        || (v6.segments()[0] & 0xFE00) == 0xFC00
        // fe80::/10 (link-local)
        || (v6.segments()[0] & 0xFFC0) == 0xFE80
}

pub fn is_local_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_ipv4(v4),
        IpAddr::V6(v6) => is_local_ipv6(v6),
    }
}

/// loopback, private, link-local and internal-only names, never fetched no matter what the
/// allowlist says
pub fn is_blocked_host(url: &Url) -> bool {
    match url.host() {
        None => true,
        Some(Host::Ipv4(v4)) => is_local_ipv4(&v4),
        Some(Host::Ipv6(v6)) => is_local_ipv6(&v6),
        Some(Host::Domain(domain)) => {
            let domain = normalize_host(domain);
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
                || domain
                    .parse::<IpAddr>()
                    .map(|ip| is_local_ip(&ip))
                    .unwrap_or(false)
        }
    }
}

/// the catalog as the relay sees it: which hosts may be fetched and which channel a request
/// belongs to
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    hosts: HashSet<String>,
    channels: Vec<Channel>,
    by_id: HashMap<String, usize>,
    by_url: HashMap<String, usize>,
}

impl CatalogSnapshot {
    pub fn build(channels: Vec<Channel>, extra_hosts: &[String]) -> Self {
        let mut hosts: HashSet<String> = extra_hosts
            .iter()
            .map(|h| normalize_host(h))
            .filter(|h| !h.is_empty())
            .collect();
        let mut by_id = HashMap::new();
        let mut by_url = HashMap::new();

        for (index, channel) in channels.iter().enumerate() {
            for candidate in channel.candidate_urls() {
                match Url::parse(candidate) {
                    Ok(url) => {
                        if let Some(host) = url.host_str() {
                            hosts.insert(normalize_host(host));
                        }
                    }
                    Err(e) => warn!(
                        "Channel {} has an unparseable url {}: {}",
                        channel.id, candidate, e
                    ),
                }
            }

            by_id.entry(channel.id.clone()).or_insert(index);
            if let Ok(url) = Url::parse(&channel.url) {
                by_url.entry(url.to_string()).or_insert(index);
            }
        }

        Self {
            hosts,
            channels,
            by_id,
            by_url,
        }
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.hosts.contains(&normalize_host(host))
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// by id when the request names one, otherwise by exact url
    pub fn channel_for(&self, channel_id: Option<&str>, url: &Url) -> Option<&Channel> {
        match channel_id.filter(|id| !id.is_empty()) {
            Some(id) => self.by_id.get(id),
            None => self.by_url.get(url.as_str()),
        }
        .and_then(|&index| self.channels.get(index))
    }
}

/// the host allowlist gate
///
/// the core set comes from the catalog on first use and stays put until `reload`. two
/// requests racing the first load both build the same snapshot, last store wins, so no lock.
/// redirect hosts only get admitted when `trust_redirect_hosts` is on.
pub struct HostAllowlist {
    catalog: DynChannelCatalog,
    extra_hosts: Vec<String>,
    trust_redirect_hosts: bool,
    snapshot: ArcSwapOption<CatalogSnapshot>,
    admitted: DashSet<String>,
}

impl HostAllowlist {
    pub fn new(
        catalog: DynChannelCatalog,
        extra_hosts: Vec<String>,
        trust_redirect_hosts: bool,
    ) -> Self {
        if trust_redirect_hosts {
            warn!("trust_resolved_redirect_hosts is on, redirect targets outside the catalog will be admitted");
        }

        Self {
            catalog,
            extra_hosts,
            trust_redirect_hosts,
            snapshot: ArcSwapOption::const_empty(),
            admitted: DashSet::new(),
        }
    }

    pub async fn snapshot(&self) -> AppResult<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.snapshot.load_full() {
            return Ok(snapshot);
        }
        self.reload().await
    }

    /// rebuilds the core set from the catalog and forgets every admitted redirect host
    pub async fn reload(&self) -> AppResult<Arc<CatalogSnapshot>> {
        let channels = self.catalog.list_channels().await?;
        let snapshot = Arc::new(CatalogSnapshot::build(channels, &self.extra_hosts));

        info!(
            "Allowlist initialised with {} hosts from {} channels",
            snapshot.host_count(),
            snapshot.channels().len()
        );

        self.snapshot.store(Some(snapshot.clone()));
        self.admitted.clear();
        Ok(snapshot)
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted.len()
    }

    /// allowed right now, no side effects
    pub fn permits(&self, snapshot: &CatalogSnapshot, url: &Url) -> bool {
        if is_blocked_host(url) {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        snapshot.contains_host(host) || self.admitted.contains(&normalize_host(host))
    }

    /// gate for a url the client asked for
    pub async fn check(&self, url: &Url) -> AppResult<()> {
        let snapshot = self.snapshot().await?;
        self.check_with(&snapshot, url)
    }

    pub fn check_with(&self, snapshot: &CatalogSnapshot, url: &Url) -> AppResult<()> {
        let host = url.host_str().unwrap_or_default();

        if is_blocked_host(url) {
            warn!("Blocked request to local address {}", host);
            return Err(Error::Forbidden(format!("{} is a local address", host)));
        }

        if self.permits(snapshot, url) {
            return Ok(());
        }

        debug!("Host {} is not allowlisted", host);
        Err(Error::Forbidden(format!("{} is not allowlisted", host)))
    }

    /// gate for a url someone upstream told us to go to, a redirect `Location` or a
    /// platform-resolved manifest
    pub async fn check_redirect(&self, url: &Url) -> AppResult<()> {
        let snapshot = self.snapshot().await?;

        match self.check_with(&snapshot, url) {
            Ok(()) => Ok(()),
            Err(e) if is_blocked_host(url) || !self.trust_redirect_hosts => Err(e),
            Err(_) => {
                let host = normalize_host(url.host_str().unwrap_or_default());
                warn!(
                    "Admitting redirect host {} for the rest of the process lifetime",
                    host
                );
                self.admitted.insert(host);
                Ok(())
            }
        }
    }
}
