use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::debug;
use url::Url;

use crate::catalog::{Channel, OriginPolicy};
use crate::server::dtos::stream_dto::StreamQuery;
use crate::server::utils::url_utils::ProxyParams;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// everything that decides how an upstream request looks
///
/// built once per request from the query (which wins) and the matched channel, then reused
/// untouched for every hop of that request so the gatekeeper and the content server see the
/// same browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disguise {
    pub referer: Option<String>,
    pub origin: OriginPolicy,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub x_forwarded_for: Option<String>,
    pub channel_id: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

impl Disguise {
    pub fn for_request(query: &StreamQuery, channel: Option<&Channel>) -> Self {
        Self {
            referer: non_empty(query.referer.as_ref())
                .or_else(|| channel.and_then(|c| non_empty(c.referer.as_ref()))),
            origin: channel.map(|c| c.origin.clone()).unwrap_or_default(),
            user_agent: non_empty(query.user_agent.as_ref())
                .or_else(|| channel.and_then(|c| non_empty(c.user_agent.as_ref()))),
            accept_language: non_empty(query.accept_language.as_ref())
                .or_else(|| channel.and_then(|c| non_empty(c.accept_language.as_ref()))),
            x_forwarded_for: non_empty(query.x_forwarded_for.as_ref()),
            channel_id: channel.map(|c| c.id.clone()),
        }
    }

    /// `Origin` value or nothing, some streams reject any origin that isn't theirs so
    /// leaving it out is as deliberate as setting it
    pub fn origin_header(&self) -> Option<String> {
        match &self.origin {
            OriginPolicy::Omit => None,
            OriginPolicy::Fixed(origin) => Some(origin.clone()),
            OriginPolicy::FromReferer => self
                .referer
                .as_deref()
                .and_then(|r| Url::parse(r).ok())
                .map(|r| r.origin().ascii_serialization())
                .filter(|o| o != "null"),
        }
    }

    /// `accept_encoding` depends on whether the body gets decoded here or goes to the
    /// client as-is, so the caller picks it
    pub fn headers(&self, range: Option<&HeaderValue>, accept_encoding: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        insert(
            &mut headers,
            header::USER_AGENT,
            self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT),
        );
        insert(&mut headers, header::ACCEPT, "*/*");
        insert(
            &mut headers,
            header::ACCEPT_LANGUAGE,
            self.accept_language
                .as_deref()
                .unwrap_or(DEFAULT_ACCEPT_LANGUAGE),
        );
        insert(&mut headers, header::ACCEPT_ENCODING, accept_encoding);

        if let Some(referer) = &self.referer {
            insert(&mut headers, header::REFERER, referer);
        }
        if let Some(origin) = self.origin_header() {
            insert(&mut headers, header::ORIGIN, &origin);
        }
        if let Some(forwarded) = &self.x_forwarded_for {
            insert(
                &mut headers,
                HeaderName::from_static("x-forwarded-for"),
                forwarded,
            );
        }

        // seeking breaks without it
        if let Some(range) = range {
            headers.insert(header::RANGE, range.clone());
        }

        headers
    }

    /// query parameters that make a rewritten line resolve to this same disguise
    pub fn proxy_params(&self) -> ProxyParams {
        let mut params = ProxyParams::new();
        if let Some(referer) = &self.referer {
            params.push(("referer", referer.clone()));
        }
        if let Some(user_agent) = &self.user_agent {
            params.push(("userAgent", user_agent.clone()));
        }
        if let Some(accept_language) = &self.accept_language {
            params.push(("acceptLanguage", accept_language.clone()));
        }
        if let Some(forwarded) = &self.x_forwarded_for {
            params.push(("xForwardedFor", forwarded.clone()));
        }
        if let Some(channel) = &self.channel_id {
            params.push(("channel", channel.clone()));
        }
        params
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!("Skipping unrepresentable {} header value", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::utils::encoding_utils::MANIFEST_ACCEPT_ENCODING;

    fn query(referer: Option<&str>) -> StreamQuery {
        StreamQuery {
            url: "https://cdn.example/ch.m3u8".to_string(),
            referer: referer.map(|r| r.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn no_referer_means_no_referer_or_origin() {
        let headers =
            Disguise::for_request(&query(None), None).headers(None, MANIFEST_ACCEPT_ENCODING);
        assert!(headers.get(header::REFERER).is_none());
        assert!(headers.get(header::ORIGIN).is_none());
        assert_eq!(
            headers.get(header::USER_AGENT).unwrap(),
            DEFAULT_USER_AGENT
        );
    }

    #[test]
    fn origin_is_derived_from_referer() {
        let headers = Disguise::for_request(&query(Some("https://player.example:8443/embed/1")), None)
            .headers(None, MANIFEST_ACCEPT_ENCODING);
        assert_eq!(
            headers.get(header::REFERER).unwrap(),
            "https://player.example:8443/embed/1"
        );
        assert_eq!(
            headers.get(header::ORIGIN).unwrap(),
            "https://player.example:8443"
        );
    }

    #[test]
    fn channel_origin_policy_applies() {
        let mut channel = Channel::new("ch", "https://cdn.example/ch.m3u8");
        channel.referer = Some("https://player.example/".to_string());
        channel.origin = OriginPolicy::Omit;

        let disguise = Disguise::for_request(&query(None), Some(&channel));
        let headers = disguise.headers(None, MANIFEST_ACCEPT_ENCODING);
        assert_eq!(headers.get(header::REFERER).unwrap(), "https://player.example/");
        assert!(headers.get(header::ORIGIN).is_none());

        channel.origin = OriginPolicy::Fixed("https://ppv.example".to_string());
        let headers = Disguise::for_request(&query(None), Some(&channel))
            .headers(None, MANIFEST_ACCEPT_ENCODING);
        assert_eq!(headers.get(header::ORIGIN).unwrap(), "https://ppv.example");
    }

    #[test]
    fn query_overrides_channel_and_range_is_forwarded() {
        let mut channel = Channel::new("ch", "https://cdn.example/ch.m3u8");
        channel.user_agent = Some("VLC/3.0.20".to_string());

        let mut q = query(None);
        q.user_agent = Some("Custom/1.0".to_string());

        let range = HeaderValue::from_static("bytes=0-1023");
        let headers = Disguise::for_request(&q, Some(&channel)).headers(Some(&range), "identity");
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "Custom/1.0");
        assert_eq!(headers.get(header::RANGE).unwrap(), "bytes=0-1023");
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "identity");
    }

    #[test]
    fn proxy_params_carry_the_disguise() {
        let mut q = query(Some("https://player.example/"));
        q.x_forwarded_for = Some("203.0.113.7".to_string());
        let channel = Channel::new("pro-tv", "https://cdn.example/ch.m3u8");

        let params = Disguise::for_request(&q, Some(&channel)).proxy_params();
        assert_eq!(
            params,
            vec![
                ("referer", "https://player.example/".to_string()),
                ("xForwardedFor", "203.0.113.7".to_string()),
                ("channel", "pro-tv".to_string()),
            ]
        );
    }
}
