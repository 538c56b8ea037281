pub mod allowlist_services;
pub mod disguise_services;
pub mod gatekeeper_services;
pub mod mirror_services;
pub mod platform_services;
pub mod proxy_services;
pub mod upstream_services;

pub use platform_services::DynMetadataExtractor;
pub use proxy_services::ProxyServices;
pub use upstream_services::DynUpstreamFetcher;
