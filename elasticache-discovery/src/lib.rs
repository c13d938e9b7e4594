pub const REFERENCE: &'static str = include_str!("../reference.toml");

pub mod error;
pub mod config;
pub mod node;
pub mod protocol;
pub mod discovery;
pub mod ext;

pub use error::{Error, Result};
pub use discovery::{discover, Discover, DiscoveryClient};
pub use node::{ClusterConfig, Node};
