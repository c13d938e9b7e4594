use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use elasticache_discovery::{Discover, DiscoveryClient, Result};
use elasticache_discovery::config::{DiscoveryConfig, DiscoverySettings};

use crate::backend::{CacheBackend, FromSelector, Item};
use crate::server_list::{ServerList, ServerSelector};
use crate::watcher::{Watcher, WatcherState};

/// A memcached client whose server list follows an ElastiCache cluster.
///
/// Cache operations are served by the wrapped backend `B` (reachable through
/// `Deref` and the forwarding [`CacheBackend`] impl). The backend routes keys
/// with the shared selector `S`, which the membership watcher keeps current.
pub struct Client<B, S = ServerList> {
    backend: B,
    servers: Arc<S>,
    endpoint: String,
    watcher: Arc<Watcher<DiscoveryClient, S>>,
}

impl<B> Client<B, ServerList> where B: FromSelector<ServerList> {
    /// Discovers the cluster behind `endpoint` once and builds the client.
    /// Fails if that first discovery fails.
    pub async fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_settings(DiscoverySettings::new(endpoint)).await
    }

    pub async fn with_config(config: DiscoveryConfig) -> Result<Self> {
        Self::with_settings(config.into()).await
    }

    pub async fn with_settings(settings: DiscoverySettings) -> Result<Self> {
        Self::with_selector(settings, Arc::new(ServerList::new())).await
    }
}

impl<B, S> Client<B, S> where B: FromSelector<S>, S: ServerSelector {
    pub async fn with_selector(settings: DiscoverySettings, selector: Arc<S>) -> Result<Self> {
        let discovery = DiscoveryClient::new(settings);
        let servers = discovery.discover().await?;
        selector.set_servers(&servers)?;
        info!("{} discovered {} cache nodes {:?}", discovery.endpoint(), servers.len(), servers);
        let endpoint = discovery.endpoint().to_string();
        let interval = discovery.settings().poll_interval;
        let backend = B::from_selector(selector.clone());
        let watcher = Watcher::new(discovery, selector.clone(), interval);
        let client = Self {
            backend,
            servers: selector,
            endpoint,
            watcher: Arc::new(watcher),
        };
        Ok(client)
    }
}

impl<B, S> Client<B, S> where S: ServerSelector {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn servers(&self) -> &Arc<S> {
        &self.servers
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn watcher_state(&self) -> WatcherState {
        self.watcher.state()
    }

    /// Keeps the server list in sync with the cluster until `cancel` fires.
    /// Discovery failures are skipped silently. Can only run once per client.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        self.watcher.watch(cancel).await
    }

    /// Runs [`Client::watch`] on a background task. Dropping the returned handle
    /// leaves the task running; call [`WatchHandle::stop`] to end it.
    pub fn spawn_watch(&self) -> WatchHandle {
        let cancel = CancellationToken::new();
        let watcher = self.watcher.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { watcher.watch(token).await });
        WatchHandle { cancel, handle }
    }
}

impl<B, S> Deref for Client<B, S> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl<B, S> Debug for Client<B, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B, S> CacheBackend for Client<B, S> where B: CacheBackend, S: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Item>> {
        self.backend.get(key).await
    }

    async fn get_multi(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, Item>> {
        self.backend.get_multi(keys).await
    }

    async fn set(&self, item: Item) -> anyhow::Result<()> {
        self.backend.set(item).await
    }

    async fn add(&self, item: Item) -> anyhow::Result<bool> {
        self.backend.add(item).await
    }

    async fn replace(&self, item: Item) -> anyhow::Result<bool> {
        self.backend.replace(item).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.backend.delete(key).await
    }

    async fn touch(&self, key: &str, expiration: u32) -> anyhow::Result<bool> {
        self.backend.touch(key, expiration).await
    }

    async fn increment(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>> {
        self.backend.increment(key, delta).await
    }

    async fn decrement(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>> {
        self.backend.decrement(key, delta).await
    }

    async fn flush_all(&self) -> anyhow::Result<()> {
        self.backend.flush_all().await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.backend.ping().await
    }
}

/// Handle to a watcher started with [`Client::spawn_watch`].
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl WatchHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the watcher and waits for its task to finish. A discovery call
    /// already in flight is not aborted, so this waits for it to complete, at
    /// most the configured `read_timeout` after the connection is made.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.handle.await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use elasticache_discovery::config::DiscoverySettings;
    use elasticache_discovery::Error;

    use crate::backend::{CacheBackend, FromSelector, Item};
    use crate::client::Client;
    use crate::server_list::{ServerList, ServerSelector};
    use crate::watcher::WatcherState;

    /// Keeps every key on the node the selector picked when it was written, so a
    /// membership change makes keys on departed nodes unreachable.
    struct MemoryBackend {
        selector: Arc<ServerList>,
        entries: DashMap<String, (SocketAddr, Item)>,
    }

    impl FromSelector<ServerList> for MemoryBackend {
        fn from_selector(selector: Arc<ServerList>) -> Self {
            Self { selector, entries: DashMap::new() }
        }
    }

    impl MemoryBackend {
        fn lookup(&self, key: &str) -> anyhow::Result<Option<Item>> {
            let server = self.selector.pick_server(key)?;
            let item = self.entries
                .get(key)
                .filter(|entry| entry.0 == server)
                .map(|entry| entry.1.clone());
            Ok(item)
        }

        fn store(&self, item: Item) -> anyhow::Result<()> {
            let server = self.selector.pick_server(&item.key)?;
            self.entries.insert(item.key.clone(), (server, item));
            Ok(())
        }

        fn counter(&self, key: &str, f: impl Fn(u64) -> u64) -> anyhow::Result<Option<u64>> {
            let Some(mut item) = self.lookup(key)? else {
                return Ok(None);
            };
            let current = std::str::from_utf8(&item.value)?.parse::<u64>()?;
            let next = f(current);
            item.value = next.to_string().into_bytes();
            self.store(item)?;
            Ok(Some(next))
        }
    }

    #[async_trait]
    impl CacheBackend for MemoryBackend {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Item>> {
            self.lookup(key)
        }

        async fn get_multi(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, Item>> {
            let mut items = HashMap::new();
            for key in keys {
                if let Some(item) = self.lookup(key)? {
                    items.insert(key.to_string(), item);
                }
            }
            Ok(items)
        }

        async fn set(&self, item: Item) -> anyhow::Result<()> {
            self.store(item)
        }

        async fn add(&self, item: Item) -> anyhow::Result<bool> {
            if self.lookup(&item.key)?.is_some() {
                return Ok(false);
            }
            self.store(item)?;
            Ok(true)
        }

        async fn replace(&self, item: Item) -> anyhow::Result<bool> {
            if self.lookup(&item.key)?.is_none() {
                return Ok(false);
            }
            self.store(item)?;
            Ok(true)
        }

        async fn delete(&self, key: &str) -> anyhow::Result<bool> {
            let existed = self.lookup(key)?.is_some();
            self.entries.remove(key);
            Ok(existed)
        }

        async fn touch(&self, key: &str, expiration: u32) -> anyhow::Result<bool> {
            match self.lookup(key)? {
                Some(mut item) => {
                    item.expiration = expiration;
                    self.store(item)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn increment(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>> {
            self.counter(key, |v| v.wrapping_add(delta))
        }

        async fn decrement(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>> {
            self.counter(key, |v| v.saturating_sub(delta))
        }

        async fn flush_all(&self) -> anyhow::Result<()> {
            self.entries.clear();
            Ok(())
        }

        async fn ping(&self) -> anyhow::Result<()> {
            if self.selector.is_empty() {
                return Err(anyhow!("no cache nodes"));
            }
            Ok(())
        }
    }

    /// Answers every `config get cluster` with whatever `nodes` holds at the time.
    async fn configuration_endpoint(nodes: Arc<Mutex<String>>) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let nodes = nodes.clone();
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let mut command = String::new();
                    if stream.read_line(&mut command).await.is_err() || command != "config get cluster\r\n" {
                        return;
                    }
                    let nodes = nodes.lock().clone();
                    let response = format!("CONFIG cluster 0 {}\r\n1\n{}\n\r\nEND\r\n", nodes.len(), nodes);
                    let _ = stream.get_mut().write_all(response.as_bytes()).await;
                });
            }
        });
        Ok(addr)
    }

    fn addrs(servers: &[&str]) -> Vec<SocketAddr> {
        servers.iter().map(|s| s.parse().expect("valid socket addr")).collect()
    }

    #[tokio::test]
    async fn test_construct_seeds_servers() -> anyhow::Result<()> {
        let nodes = Arc::new(Mutex::new("foo.example.com|10.0.0.1|11211 bar.example.com|10.0.0.2|11211".to_string()));
        let endpoint = configuration_endpoint(nodes).await?.to_string();
        let client = Client::<MemoryBackend>::new(endpoint.clone()).await?;
        assert_eq!(client.endpoint(), endpoint);
        assert_eq!(*client.servers().servers(), addrs(&["10.0.0.1:11211", "10.0.0.2:11211"]));
        assert_eq!(client.watcher_state(), WatcherState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_construct_connection_refused() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = listener.local_addr()?.to_string();
        drop(listener);
        let result = Client::<MemoryBackend>::new(endpoint).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_construct_malformed_response() -> anyhow::Result<()> {
        let nodes = Arc::new(Mutex::new("foo.example.com|10.0.0.1|abc".to_string()));
        let endpoint = configuration_endpoint(nodes).await?.to_string();
        let result = Client::<MemoryBackend>::new(endpoint).await;
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_operations_are_forwarded() -> anyhow::Result<()> {
        let nodes = Arc::new(Mutex::new("foo.example.com|10.0.0.1|11211 bar.example.com|10.0.0.2|11211".to_string()));
        let endpoint = configuration_endpoint(nodes).await?.to_string();
        let client = Client::<MemoryBackend>::new(endpoint).await?;
        client.set(Item::new("greeting", "hello")).await?;
        assert_eq!(client.get("greeting").await?.map(|i| i.value), Some(b"hello".to_vec()));
        assert!(!client.add(Item::new("greeting", "again")).await?);
        assert!(client.replace(Item::new("greeting", "hi")).await?);
        client.set(Item::new("counter", "41")).await?;
        assert_eq!(client.increment("counter", 1).await?, Some(42));
        assert_eq!(client.decrement("counter", 50).await?, Some(0));
        assert_eq!(client.increment("missing", 1).await?, None);
        let items = client.get_multi(&["greeting", "counter", "missing"]).await?;
        assert_eq!(items.len(), 2);
        assert!(client.touch("greeting", 300).await?);
        assert_eq!(client.backend().get("greeting").await?.map(|i| i.expiration), Some(300));

        let backend: &dyn CacheBackend = &client;
        assert!(backend.delete("greeting").await?);
        assert!(backend.get("greeting").await?.is_none());
        backend.ping().await?;
        backend.flush_all().await?;
        assert!(client.get("counter").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_spawned_watch_follows_membership() -> anyhow::Result<()> {
        let nodes = Arc::new(Mutex::new("a.example.com|10.0.0.1|11211".to_string()));
        let endpoint = configuration_endpoint(nodes.clone()).await?.to_string();
        let settings = DiscoverySettings::builder()
            .endpoint(endpoint)
            .poll_interval(Duration::from_millis(50))
            .read_timeout(Duration::from_secs(1))
            .build();
        let client = Client::<MemoryBackend>::with_settings(settings).await?;
        client.set(Item::new("session", "alive")).await?;
        let handle = client.spawn_watch();

        *nodes.lock() = "b.example.com|10.0.0.2|11211".to_string();
        let expected = addrs(&["10.0.0.2:11211"]);
        tokio::time::timeout(Duration::from_secs(5), async {
            while *client.servers().servers() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }).await?;
        assert_eq!(client.watcher_state(), WatcherState::Running);
        // the key lived on the departed node
        assert!(client.get("session").await?.is_none());

        handle.stop().await?;
        assert_eq!(client.watcher_state(), WatcherState::Stopped);
        assert!(matches!(client.watch(Default::default()).await, Err(Error::WatcherStopped)));
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_keeps_servers_when_endpoint_breaks() -> anyhow::Result<()> {
        let nodes = Arc::new(Mutex::new("a.example.com|10.0.0.1|11211".to_string()));
        let endpoint = configuration_endpoint(nodes.clone()).await?.to_string();
        let settings = DiscoverySettings::builder()
            .endpoint(endpoint)
            .poll_interval(Duration::from_millis(20))
            .build();
        let client = Client::<MemoryBackend>::with_settings(settings).await?;
        let handle = client.spawn_watch();
        *nodes.lock() = "a.example.com|10.0.0.1".to_string();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*client.servers().servers(), addrs(&["10.0.0.1:11211"]));
        assert!(!handle.is_finished());
        handle.stop().await?;
        Ok(())
    }
}
