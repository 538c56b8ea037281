pub mod channel;
pub mod file_catalog;

pub use channel::*;
pub use file_catalog::FileChannelCatalog;
