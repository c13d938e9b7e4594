use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use elasticache_discovery::{Discover, Error, Result};

use crate::server_list::ServerSelector;

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Running,
    Stopped,
}

/// Polls the configuration endpoint on a fixed interval and pushes every
/// successful result into the shared selector. Failed cycles are skipped and
/// the selector keeps its last known servers.
pub struct Watcher<D, S: ?Sized> {
    discovery: D,
    selector: Arc<S>,
    interval: Duration,
    state: Mutex<WatcherState>,
}

impl<D, S> Watcher<D, S> where D: Discover, S: ServerSelector + ?Sized {
    pub fn new(discovery: D, selector: Arc<S>, interval: Duration) -> Self {
        let interval = if interval < MIN_POLL_INTERVAL {
            warn!("poll interval {:?} is below {:?}, using {:?}", interval, MIN_POLL_INTERVAL, MIN_POLL_INTERVAL);
            MIN_POLL_INTERVAL
        } else {
            interval
        };
        Self {
            discovery,
            selector,
            interval,
            state: Mutex::new(WatcherState::Idle),
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until `cancel` fires. The first discovery happens one interval after
    /// the call, not immediately. A watcher runs at most once.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                WatcherState::Idle => *state = WatcherState::Running,
                WatcherState::Running => return Err(Error::WatcherRunning),
                WatcherState::Stopped => return Err(Error::WatcherStopped),
            }
        }
        let _stopped = StopOnDrop(&self.state);
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("start watching cluster membership every {:?}", self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("membership watch cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
        Ok(())
    }

    async fn refresh(&self) {
        match self.discovery.discover().await {
            Ok(servers) => {
                match self.selector.set_servers(&servers) {
                    Ok(_) => {
                        trace!("membership refreshed with {} servers", servers.len());
                    }
                    Err(error) => {
                        debug!("skip membership refresh, servers {:?} rejected: {}", servers, error);
                    }
                }
            }
            Err(error) if error.is_connection() => {
                debug!("skip membership refresh, configuration endpoint unreachable: {}", error);
            }
            Err(error) if error.is_malformed() => {
                debug!("skip membership refresh, unexpected discovery response: {}", error);
            }
            Err(error) => {
                debug!("skip membership refresh, discovery failed: {}", error);
            }
        }
    }
}

impl<D, S: ?Sized> Debug for Watcher<D, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("interval", &self.interval)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

struct StopOnDrop<'a>(&'a Mutex<WatcherState>);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock() = WatcherState::Stopped;
    }
}
