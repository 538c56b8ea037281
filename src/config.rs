use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

/// what happens to a manifest line whose resolved host isn't allowlisted
#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum ManifestHostPolicy {
    /// replace the line with a comment marker
    Drop,
    /// leave the original line untouched and unproxied
    Passthrough,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // json file with the channel list, every channel url (and its backups) seeds the allowlist
    #[clap(long, env)]
    pub channel_catalog: Option<PathBuf>,

    // extra hosts on top of the catalog, comma seperated like cdn.example.com,other.net
    #[clap(long, env, value_delimiter = ',')]
    pub allowed_hosts: Vec<String>,

    // when a gatekeeper or cdn redirects to a host we don't know, let it in for the rest of
    // the process lifetime instead of 403ing. weakens the allowlist so it's off by default
    #[clap(long, env, default_value_t = false)]
    pub trust_resolved_redirect_hosts: bool,

    #[clap(long, env, value_enum, default_value = "drop")]
    pub manifest_host_policy: ManifestHostPolicy,

    // budget for every single upstream fetch (gatekeeper, content, platform extraction)
    #[clap(long, env, default_value = "15000")]
    pub upstream_timeout_ms: u64,

    // one shared budget for the whole mirror race, not per probe
    #[clap(long, env, default_value = "2800")]
    pub mirror_race_timeout_ms: u64,

    #[clap(long, env, default_value = "5")]
    pub max_redirects: usize,

    // path suffixes that mark a url as a gatekeeper script
    #[clap(
        long,
        env,
        value_delimiter = ',',
        default_value = ".php,.asp,.aspx,.jsp,.cgi"
    )]
    pub gatekeeper_extensions: Vec<String>,

    #[clap(long, env, default_value = "yt-dlp")]
    pub yt_dlp_path: String,

    #[clap(long, env, default_value = "512")]
    pub max_concurrent_requests: usize,

    // only used in production, development logs to stdout
    #[clap(long, env, default_value = "logs")]
    pub log_dir: PathBuf,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn mirror_race_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror_race_timeout_ms)
    }
}

impl Default for AppConfig {
    // mirrors the clap defaults, mostly here so tests can build services without a cli
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            channel_catalog: None,
            allowed_hosts: Vec::new(),
            trust_resolved_redirect_hosts: false,
            manifest_host_policy: ManifestHostPolicy::Drop,
            upstream_timeout_ms: 15_000,
            mirror_race_timeout_ms: 2_800,
            max_redirects: 5,
            gatekeeper_extensions: [".php", ".asp", ".aspx", ".jsp", ".cgi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            yt_dlp_path: "yt-dlp".to_string(),
            max_concurrent_requests: 512,
            log_dir: PathBuf::from("logs"),
            sentry_dsn: None,
        }
    }
}
