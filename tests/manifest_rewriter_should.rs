use std::mem::discriminant;

use url::Url;

use stream_relay::ManifestHostPolicy;
use stream_relay::server::utils::manifest_utils::{ManifestLine, ManifestRewriter, parse_manifest};

const REFERER_PARAM: &str = "&referer=https%3A%2F%2Fplayer.example%2F";

const MEDIA_PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4

#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example/k1\"
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:4.0,
seg001.ts
#EXTINF:4.0,
/abs/seg002.ts
#EXTINF:4.0,
//mirror.example/seg003.ts
#EXTINF:4.0,
https://evil.example/seg004.ts
#EXT-X-ENDLIST
";

fn base() -> Url {
    Url::parse("https://cdn.example/live/ch/index.m3u8?token=abc").unwrap()
}

fn params() -> Vec<(&'static str, String)> {
    vec![("referer", "https://player.example/".to_string())]
}

fn allowed(url: &Url) -> bool {
    matches!(
        url.host_str(),
        Some("cdn.example") | Some("mirror.example") | Some("keys.example")
    )
}

/// the `url` query value of a rewritten line
fn target_of(line: &str) -> String {
    let query = line
        .split_once('?')
        .map(|(_, q)| q)
        .unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.to_string())
        .unwrap()
}

#[test]
fn test_structure_is_preserved_when_everything_is_allowed() {
    let base = base();
    let params = params();
    let rewriter = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, |_: &Url| true);
    let out = rewriter.rewrite(MEDIA_PLAYLIST);

    let before = parse_manifest(MEDIA_PLAYLIST);
    let after = parse_manifest(&out);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(discriminant(b), discriminant(a), "{b:?} vs {a:?}");
    }
}

#[test]
fn test_segments_resolve_like_a_browser() {
    let base = base();
    let params = params();
    let rewriter = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, allowed);
    let out = rewriter.rewrite(MEDIA_PLAYLIST);

    let segments: Vec<&str> = parse_manifest(&out)
        .into_iter()
        .filter_map(|line| match line {
            ManifestLine::SegmentReference(s) => Some(s),
            _ => None,
        })
        .collect();

    let targets: Vec<String> = segments.iter().map(|s| target_of(s)).collect();
    assert_eq!(
        targets,
        vec![
            "https://cdn.example/live/ch/seg001.ts",
            // root-relative goes against the origin, not the manifest directory
            "https://cdn.example/abs/seg002.ts",
            "https://mirror.example/seg003.ts",
        ]
    );

    for segment in segments {
        assert!(segment.starts_with("/streams?url="), "{segment}");
        assert!(segment.ends_with(REFERER_PARAM), "{segment}");
    }
}

#[test]
fn test_key_and_map_uris_are_proxied_with_the_referer() {
    let base = base();
    let params = params();
    let rewriter = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, allowed);
    let out = rewriter.rewrite(MEDIA_PLAYLIST);

    assert!(out.contains(&format!(
        "#EXT-X-KEY:METHOD=AES-128,URI=\"/streams?url=https%3A%2F%2Fkeys.example%2Fk1{}\"",
        REFERER_PARAM
    )));
    assert!(out.contains(&format!(
        "#EXT-X-MAP:URI=\"/streams?url=https%3A%2F%2Fcdn.example%2Flive%2Fch%2Finit.mp4{}\"",
        REFERER_PARAM
    )));
}

#[test]
fn test_disallowed_hosts_follow_the_policy() {
    let base = base();
    let params = params();

    let dropped = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, allowed)
        .rewrite(MEDIA_PLAYLIST);
    assert!(dropped.contains("# stream-relay: dropped reference to evil.example"));
    assert!(!dropped.contains("evil.example/seg004.ts"));

    let passed = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Passthrough, allowed)
        .rewrite(MEDIA_PLAYLIST);
    assert!(passed.contains("\nhttps://evil.example/seg004.ts\n"));
}

#[test]
fn test_disallowed_key_drops_the_whole_directive() {
    let base = base();
    let params = params();
    let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"https://evil.example/key\"\nseg.ts\n";

    let (out, stats) = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, allowed)
        .rewrite_with_stats(manifest);

    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.proxied, 1);
    assert_eq!(
        out.lines().nth(1),
        Some("# stream-relay: dropped reference to evil.example")
    );
}

#[test]
fn test_master_playlist_variants_and_renditions_are_proxied() {
    let base = Url::parse("https://cdn.example/master.m3u8").unwrap();
    let params = params();
    let manifest = "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"audio/en.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1280000,AUDIO=\"aud\"
video/720.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"iframes/720.m3u8\"
";

    let out = ManifestRewriter::new(&base, &params, ManifestHostPolicy::Drop, allowed)
        .rewrite(manifest);

    assert!(out.contains("URI=\"/streams?url=https%3A%2F%2Fcdn.example%2Faudio%2Fen.m3u8"));
    assert!(out.contains("GROUP-ID=\"aud\",NAME=\"en\""));
    assert!(out.contains("\n/streams?url=https%3A%2F%2Fcdn.example%2Fvideo%2F720.m3u8"));
    assert!(out.contains("URI=\"/streams?url=https%3A%2F%2Fcdn.example%2Fiframes%2F720.m3u8"));
    assert!(out.contains("#EXT-X-STREAM-INF:BANDWIDTH=1280000,AUDIO=\"aud\"\n"));
}
