use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use tracing::error;
use url::Url;

use crate::server::error::{AppResult, Error};

/// where rewritten manifest lines point back to
pub const STREAMS_PATH: &str = "/streams";

/// query parameters carried on every proxy url, in the order they're written
pub type ProxyParams = Vec<(&'static str, String)>;

fn has_http_scheme(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// the `url` param is either a plain absolute url or unpadded url-safe base64 of one, the
/// base64 form exists for players that mangle nested query strings
pub fn decode_target(url_param: &str) -> AppResult<String> {
    let trimmed = url_param.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("url parameter is empty".to_string()));
    }

    if has_http_scheme(trimmed) {
        return Ok(trimmed.to_string());
    }

    let mut padded = trimmed.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = URL_SAFE.decode(&padded).map_err(|e| {
        error!("Failed to decode base64 target: {}", e);
        Error::InvalidUrl("url is neither http(s) nor base64".to_string())
    })?;

    String::from_utf8(bytes).map_err(|e| {
        error!("Failed to parse decoded target as UTF-8: {}", e);
        Error::InvalidUrl("decoded url is not UTF-8".to_string())
    })
}

/// absolute http(s) url with a host or `InvalidUrl`
pub fn parse_target(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(format!("{} has no host", raw)));
    }

    Ok(url)
}

/// resolves a manifest reference against the manifest's final url
///
/// every form is handled on its own: absolute, protocol-relative (`//host/p`), root-relative
/// (`/p`, against the origin and never the manifest directory) and plain relative.
pub fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    if reference.starts_with("//") {
        return Url::parse(&format!("{}:{}", base.scheme(), reference)).ok();
    }

    if reference.starts_with('/') {
        return Url::parse(&format!(
            "{}{}",
            base.origin().ascii_serialization(),
            reference
        ))
        .ok();
    }

    match Url::parse(reference) {
        Ok(absolute) => Some(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(reference).ok(),
        Err(_) => None,
    }
}

/// `/streams?url=<target>&<params>` with everything percent encoded
pub fn proxy_url(target: &Url, params: &[(&'static str, String)]) -> String {
    let mut out = format!(
        "{}?url={}",
        STREAMS_PATH,
        urlencoding::encode(target.as_str())
    );
    for (name, value) in params {
        out.push('&');
        out.push_str(name);
        out.push('=');
        out.push_str(&urlencoding::encode(value));
    }
    out
}
