use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// A cache entry as seen by the backend client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
    pub flags: u32,
    /// Seconds, or an absolute unix time for values above 30 days. Zero never expires.
    pub expiration: u32,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Builds a backend client that routes every operation through `selector`.
pub trait FromSelector<S>: Sized {
    fn from_selector(selector: Arc<S>) -> Self;
}

/// Key-value operations of a memcached client. The wire protocol and node
/// connections live in the implementation; it consults its selector per call.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Item>>;

    async fn get_multi(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, Item>>;

    async fn set(&self, item: Item) -> anyhow::Result<()>;

    /// Stores `item` only if the key does not exist yet. Returns whether it was stored.
    async fn add(&self, item: Item) -> anyhow::Result<bool>;

    /// Stores `item` only if the key already exists. Returns whether it was stored.
    async fn replace(&self, item: Item) -> anyhow::Result<bool>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    async fn touch(&self, key: &str, expiration: u32) -> anyhow::Result<bool>;

    async fn increment(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>>;

    async fn decrement(&self, key: &str, delta: u64) -> anyhow::Result<Option<u64>>;

    async fn flush_all(&self) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()>;
}
