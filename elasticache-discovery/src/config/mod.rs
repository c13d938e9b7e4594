use std::time::Duration;

use ::config::{File, FileFormat, Source};
use ::config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::config::duration::ConfigDuration;
use crate::REFERENCE;

pub mod duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// File form of the discovery settings, layered over `reference.toml`.
///
/// Durations are tables such as `{ minutes = 5 }`. Their defaults come from serde
/// rather than the reference file, so a configured table replaces the default
/// as a whole instead of being merged into it key by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub endpoint: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: ConfigDuration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<ConfigDuration>,
    #[serde(default = "default_read_timeout", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<ConfigDuration>,
}

fn default_poll_interval() -> ConfigDuration {
    ConfigDuration::from_secs(DEFAULT_POLL_INTERVAL.as_secs())
}

fn default_read_timeout() -> Option<ConfigDuration> {
    Some(ConfigDuration::from_secs(DEFAULT_READ_TIMEOUT.as_secs()))
}

impl DiscoveryConfig {
    pub fn builder() -> DiscoveryConfigBuilder {
        DiscoveryConfigBuilder::default()
    }
}

#[derive(Debug)]
pub struct DiscoveryConfigBuilder {
    builder: ::config::ConfigBuilder<DefaultState>,
}

impl Default for DiscoveryConfigBuilder {
    fn default() -> Self {
        let builder = ::config::Config::builder().add_source(File::from_str(REFERENCE, FileFormat::Toml));
        Self { builder }
    }
}

impl DiscoveryConfigBuilder {
    pub fn add_source<T>(self, source: T) -> Self where T: Source + Send + Sync + 'static {
        Self { builder: self.builder.add_source(source) }
    }

    pub fn endpoint(self, endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let builder = self.builder.set_override("endpoint", endpoint.into())?;
        Ok(Self { builder })
    }

    pub fn build(self) -> anyhow::Result<DiscoveryConfig> {
        let discovery_config = self.builder.build()?.try_deserialize::<DiscoveryConfig>()?;
        Ok(discovery_config)
    }
}

/// Resolved settings used by the discovery client and the membership watcher.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DiscoverySettings {
    #[builder(setter(into))]
    pub endpoint: String,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,
    /// `None` leaves the connect timeout to the operating system.
    #[builder(default, setter(strip_option))]
    pub connect_timeout: Option<Duration>,
    /// Bounds reading the whole response, so a server that never sends `END`
    /// cannot hold a discovery call forever.
    #[builder(default = Some(DEFAULT_READ_TIMEOUT), setter(strip_option))]
    pub read_timeout: Option<Duration>,
}

impl DiscoverySettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::builder().endpoint(endpoint).build()
    }
}

impl From<DiscoveryConfig> for DiscoverySettings {
    fn from(value: DiscoveryConfig) -> Self {
        let DiscoveryConfig { endpoint, poll_interval, connect_timeout, read_timeout } = value;
        Self {
            endpoint,
            poll_interval: poll_interval.into(),
            connect_timeout: connect_timeout.map(Into::into),
            read_timeout: read_timeout.map(Into::into),
        }
    }
}
