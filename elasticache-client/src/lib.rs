pub mod backend;
pub mod server_list;
pub mod watcher;
pub mod client;

pub use client::{Client, WatchHandle};
pub use elasticache_discovery::{Error, Result};
pub use server_list::{ServerList, ServerSelector};
pub use tokio_util::sync::CancellationToken;
pub use watcher::{Watcher, WatcherState};
