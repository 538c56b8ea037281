use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::{info, warn};

use stream_relay::catalog::{DynChannelCatalog, FileChannelCatalog, StaticChannelCatalog};
use stream_relay::{AppConfig, Logger, StreamProxyServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and keep sentry connected
    let _guards = Logger::init(
        config.cargo_env,
        &config.log_dir,
        config.sentry_dsn.clone(),
    );

    info!("logger and env prepped...");

    let catalog: DynChannelCatalog = match &config.channel_catalog {
        Some(path) => {
            info!("using channel catalog {}", path.display());
            Arc::new(FileChannelCatalog::new(path.clone()))
        }
        None => {
            // only ALLOWED_HOSTS will be reachable
            warn!("no CHANNEL_CATALOG set, starting with an empty channel list");
            Arc::new(StaticChannelCatalog::default())
        }
    };

    StreamProxyServer::serve(config, catalog)
        .await
        .context("stream relay failed to start")?;

    Ok(())
}
