use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};

use elasticache_discovery::{Error, Result};

/// Picks the cache node that owns a key. Implementations are shared between the
/// membership watcher, which replaces the servers, and every cache operation.
pub trait ServerSelector: Send + Sync + 'static {
    /// Replaces the whole server set. Concurrent readers must observe either the
    /// previous set or the new one, never a mix.
    fn set_servers(&self, servers: &[String]) -> Result<()>;

    fn pick_server(&self, key: &str) -> Result<SocketAddr>;

    fn servers(&self) -> Arc<Vec<SocketAddr>>;
}

#[derive(Debug, Default)]
pub struct ServerList {
    addrs: ArcSwap<Vec<SocketAddr>>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.addrs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.load().is_empty()
    }
}

impl ServerSelector for ServerList {
    fn set_servers(&self, servers: &[String]) -> Result<()> {
        let addrs = servers
            .iter()
            .map(|server| server.parse::<SocketAddr>().map_err(|_| Error::InvalidEndpoint(server.clone())))
            .collect::<Result<Vec<_>>>()?;
        self.addrs.store(Arc::new(addrs));
        Ok(())
    }

    fn pick_server(&self, key: &str) -> Result<SocketAddr> {
        let addrs = self.addrs.load();
        match addrs.len() {
            0 => Err(Error::NoServers),
            1 => Ok(addrs[0]),
            len => {
                let digest = Sha256::digest(key.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                let index = u64::from_be_bytes(prefix) % len as u64;
                Ok(addrs[index as usize])
            }
        }
    }

    fn servers(&self) -> Arc<Vec<SocketAddr>> {
        self.addrs.load_full()
    }
}
