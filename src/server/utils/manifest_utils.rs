use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::config::ManifestHostPolicy;
use crate::server::utils::url_utils::{proxy_url, resolve_reference};

// attribute has to start right after the tag colon or a comma, otherwise client attributes
// like X-ASSET-URI on a daterange would be picked up as well
static URI_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([:,])URI="([^"]*)""#).expect("static regex should compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestLine<'a> {
    Blank,
    /// `#EXTM3U`, `#EXTINF`, `#EXT-X-KEY:...` and plain comments alike
    Comment(&'a str),
    /// anything else, trimmed
    SegmentReference(&'a str),
}

impl<'a> ManifestLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            Self::Blank
        } else if trimmed.starts_with('#') {
            Self::Comment(trimmed)
        } else {
            Self::SegmentReference(trimmed)
        }
    }
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// one entry per `\n` separated line, in order
pub fn parse_manifest(text: &str) -> Vec<ManifestLine<'_>> {
    strip_bom(text).split('\n').map(ManifestLine::parse).collect()
}

pub fn dropped_marker(host: &str) -> String {
    format!("# stream-relay: dropped reference to {}", host)
}

enum Route {
    Proxied(String),
    Untouched,
    Dropped(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub proxied: usize,
    pub dropped: usize,
}

/// rewrites every reference in a playlist so it comes back through `/streams`
///
/// `base` must be the url the manifest was finally served from (after redirects), relative
/// lines resolve against it. `params` are the disguise parameters appended to every proxy
/// url so keys, init segments and media segments are fetched exactly like the manifest was.
pub struct ManifestRewriter<'a, F> {
    base: &'a Url,
    params: &'a [(&'static str, String)],
    policy: ManifestHostPolicy,
    is_allowed: F,
}

impl<'a, F> ManifestRewriter<'a, F>
where
    F: Fn(&Url) -> bool,
{
    pub fn new(
        base: &'a Url,
        params: &'a [(&'static str, String)],
        policy: ManifestHostPolicy,
        is_allowed: F,
    ) -> Self {
        Self {
            base,
            params,
            policy,
            is_allowed,
        }
    }

    pub fn rewrite(&self, text: &str) -> String {
        let (rewritten, stats) = self.rewrite_with_stats(text);
        debug!(
            "Rewrote manifest from {}: {} references proxied, {} dropped",
            self.base, stats.proxied, stats.dropped
        );
        rewritten
    }

    pub fn rewrite_with_stats(&self, text: &str) -> (String, RewriteStats) {
        let mut stats = RewriteStats::default();

        let lines: Vec<String> = strip_bom(text)
            .split('\n')
            .map(|raw| {
                // keep crlf manifests crlf
                let (line, cr) = match raw.strip_suffix('\r') {
                    Some(stripped) => (stripped, "\r"),
                    None => (raw, ""),
                };

                let rewritten = match ManifestLine::parse(line) {
                    ManifestLine::Blank => line.to_string(),
                    ManifestLine::Comment(_) => self.rewrite_comment(line, &mut stats),
                    ManifestLine::SegmentReference(reference) => {
                        match self.route(reference, &mut stats) {
                            Route::Proxied(proxied) => proxied,
                            Route::Untouched => line.to_string(),
                            Route::Dropped(host) => dropped_marker(&host),
                        }
                    }
                };

                format!("{}{}", rewritten, cr)
            })
            .collect();

        (lines.join("\n"), stats)
    }

    fn rewrite_comment(&self, line: &str, stats: &mut RewriteStats) -> String {
        if !line.contains("URI=\"") {
            return line.to_string();
        }

        let mut out = String::with_capacity(line.len() * 2);
        let mut last = 0;

        for caps in URI_ATTRIBUTE.captures_iter(line) {
            let (Some(whole), Some(separator), Some(value)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };

            out.push_str(&line[last..whole.start()]);
            match self.route(value.as_str(), stats) {
                Route::Proxied(proxied) => {
                    out.push_str(separator.as_str());
                    out.push_str("URI=\"");
                    out.push_str(&proxied);
                    out.push('"');
                }
                Route::Untouched => out.push_str(whole.as_str()),
                // a key or init segment we won't proxy makes the whole directive useless
                Route::Dropped(host) => return dropped_marker(&host),
            }
            last = whole.end();
        }

        out.push_str(&line[last..]);
        out
    }

    fn route(&self, reference: &str, stats: &mut RewriteStats) -> Route {
        let Some(resolved) = resolve_reference(self.base, reference) else {
            debug!("Could not resolve manifest reference: {}", reference);
            return Route::Untouched;
        };

        // skd:// and friends belong to drm we don't touch
        if !matches!(resolved.scheme(), "http" | "https") {
            return Route::Untouched;
        }

        if (self.is_allowed)(&resolved) {
            stats.proxied += 1;
            return Route::Proxied(proxy_url(&resolved, self.params));
        }

        let host = resolved.host_str().unwrap_or_default().to_string();
        match self.policy {
            ManifestHostPolicy::Drop => {
                warn!("Dropping manifest reference to non-allowlisted host {}", host);
                stats.dropped += 1;
                Route::Dropped(host)
            }
            ManifestHostPolicy::Passthrough => {
                debug!("Passing through reference to non-allowlisted host {}", host);
                Route::Untouched
            }
        }
    }
}
