pub mod catalog;
pub mod config;
pub mod logger;
pub mod server;

pub use config::*;
pub use logger::*;
pub use server::StreamProxyServer;
pub use server::build_router;
