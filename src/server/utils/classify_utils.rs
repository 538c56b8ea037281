use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Manifest,
    Binary,
}

// what misconfigured origins send for playlists more often than not
const GENERIC_CONTENT_TYPES: [&str; 4] = [
    "application/octet-stream",
    "binary/octet-stream",
    "text/plain",
    "application/binary",
];

pub fn is_generic_content_type(content_type: Option<&str>) -> bool {
    match content_type.map(|c| c.trim().to_ascii_lowercase()) {
        None => true,
        Some(c) if c.is_empty() => true,
        Some(c) => GENERIC_CONTENT_TYPES.iter().any(|g| c.starts_with(g)),
    }
}

fn has_manifest_path(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".m3u8")
}

fn has_manifest_hint(url: &Url) -> bool {
    let whole = url.as_str().to_ascii_lowercase();
    ["m3u8", "playlist", "master"]
        .iter()
        .any(|hint| whole.contains(hint))
}

/// whether a url is worth fetching as a playlist before anything has come back
pub fn looks_like_manifest(url: &Url) -> bool {
    has_manifest_path(url) || has_manifest_hint(url)
}

/// lenient on purpose, a playlist served as octet-stream still has to be rewritten or the
/// player walks straight past the proxy on the next request
///
/// `requested` is what the client asked for and `served` is where redirects ended up,
/// a hint in either one counts.
pub fn classify(content_type: Option<&str>, requested: &Url, served: &Url) -> ContentKind {
    let lowered = content_type.map(|c| c.to_ascii_lowercase());

    // covers x-mpegurl and vnd.apple.mpegurl too
    if lowered.as_deref().is_some_and(|c| c.contains("mpegurl")) {
        return ContentKind::Manifest;
    }

    if has_manifest_path(requested) || has_manifest_path(served) {
        return ContentKind::Manifest;
    }

    if is_generic_content_type(lowered.as_deref())
        && (has_manifest_hint(requested) || has_manifest_hint(served))
    {
        return ContentKind::Manifest;
    }

    ContentKind::Binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("application/vnd.apple.mpegurl"), "https://c.example/a", ContentKind::Manifest)]
    #[case(Some("audio/x-mpegURL; charset=utf-8"), "https://c.example/a", ContentKind::Manifest)]
    #[case(Some("video/mp2t"), "https://c.example/ch.m3u8", ContentKind::Manifest)]
    #[case(None, "https://c.example/get?file=master", ContentKind::Manifest)]
    #[case(Some("application/octet-stream"), "https://c.example/playlist/7", ContentKind::Manifest)]
    #[case(Some("video/mp2t"), "https://c.example/playlist/seg1.ts", ContentKind::Binary)]
    #[case(Some("application/octet-stream"), "https://c.example/seg1.ts", ContentKind::Binary)]
    #[case(None, "https://c.example/key.bin", ContentKind::Binary)]
    fn classifies(#[case] ct: Option<&str>, #[case] url: &str, #[case] expected: ContentKind) {
        let url = Url::parse(url).unwrap();
        assert_eq!(classify(ct, &url, &url), expected);
    }

    #[rstest]
    #[case("https://c.example/live/ch.m3u8", "https://c.example/token/xyz", ContentKind::Manifest)]
    #[case("https://c.example/get?file=master", "https://c.example/token/xyz", ContentKind::Manifest)]
    #[case("https://c.example/go", "https://c.example/hls/playlist", ContentKind::Manifest)]
    #[case("https://c.example/key.bin", "https://c.example/token/xyz", ContentKind::Binary)]
    fn hints_count_before_and_after_redirects(
        #[case] requested: &str,
        #[case] served: &str,
        #[case] expected: ContentKind,
    ) {
        let requested = Url::parse(requested).unwrap();
        let served = Url::parse(served).unwrap();
        assert_eq!(
            classify(Some("application/octet-stream"), &requested, &served),
            expected
        );
    }

    #[test]
    fn binary_looking_urls_are_not_expected_to_be_playlists() {
        assert!(looks_like_manifest(&Url::parse("https://c.example/ch.m3u8").unwrap()));
        assert!(!looks_like_manifest(&Url::parse("https://c.example/key.bin").unwrap()));
    }
}
