use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::DiscoverySettings;
use crate::error::{Error, Result};
use crate::node::ClusterConfig;
use crate::protocol::read_cluster_config;

pub const CONFIG_GET_CLUSTER: &[u8] = b"config get cluster\r\n";

/// Source of the current cluster membership as a list of `ip:port` endpoints.
#[async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T> Discover for Arc<T> where T: Discover + ?Sized {
    async fn discover(&self) -> Result<Vec<String>> {
        (**self).discover().await
    }
}

/// Queries an ElastiCache configuration endpoint. Every call dials a fresh
/// connection which is closed before the call returns.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    settings: DiscoverySettings,
}

impl DiscoveryClient {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self { settings }
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    async fn connect(&self) -> Result<TcpStream> {
        let endpoint = self.settings.endpoint.as_str();
        let stream = match self.settings.connect_timeout {
            None => TcpStream::connect(endpoint).await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
                    Ok(stream) => stream,
                    Err(_) => Err(timed_out("connect", endpoint, timeout)),
                }
            }
        };
        stream.map_err(Error::Connection)
    }

    pub async fn cluster_config(&self) -> Result<ClusterConfig> {
        let endpoint = self.endpoint();
        let mut stream = self.connect().await?;
        stream.write_all(CONFIG_GET_CLUSTER).await.map_err(Error::Connection)?;
        let reader = BufReader::new(&mut stream);
        let config = match self.settings.read_timeout {
            None => read_cluster_config(reader).await?,
            Some(timeout) => {
                tokio::time::timeout(timeout, read_cluster_config(reader))
                    .await
                    .map_err(|_| Error::Connection(timed_out("read", endpoint, timeout)))??
            }
        };
        debug!("{} reported {} nodes, config version {:?}", endpoint, config.nodes.len(), config.version);
        Ok(config)
    }
}

#[async_trait]
impl Discover for DiscoveryClient {
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(self.cluster_config().await?.endpoints())
    }
}

/// One-shot discovery against `endpoint` with default settings.
pub async fn discover(endpoint: &str) -> Result<Vec<String>> {
    DiscoveryClient::new(DiscoverySettings::new(endpoint)).discover().await
}

fn timed_out(op: &str, endpoint: &str, timeout: Duration) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} {} timed out after {:?}", op, endpoint, timeout))
}
