//! Exit node registry: the cached address set and its refresh policy.

use crate::config::Config;
use crate::error::RegistryError;
use crate::fetcher::{self, AddressSet, HttpFetcher, RefreshOutcome, SourceFetcher};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Address set and the time it was fetched. Always replaced as a pair.
#[derive(Debug, Default)]
struct RegistryState {
    nodes: AddressSet,
    last_fetched: Option<Instant>,
    /// Bumped on every swap.
    generation: u64,
    /// The last cycle produced no addresses.
    empty_refresh: bool,
}

impl RegistryState {
    /// Empty, never fetched, or older than `interval`.
    fn is_stale(&self, interval: Duration) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        match self.last_fetched {
            Some(at) => at.elapsed() > interval,
            None => true,
        }
    }
}

/// Snapshot of the freshness fields, read under one lock.
#[derive(Debug, Clone, Copy)]
struct Staleness {
    stale: bool,
    generation: u64,
    empty_refresh: bool,
}

struct Inner {
    sources: Vec<String>,
    refresh_interval: Duration,
    fail_on_empty: bool,
    fetcher: Arc<dyn SourceFetcher>,
    state: RwLock<RegistryState>,
    refresh_lock: Arc<Mutex<()>>,
}

impl Inner {
    /// Fetch every source, merge, and swap in the result.
    async fn refresh(&self) -> Result<RefreshOutcome, RegistryError> {
        debug!(sources = self.sources.len(), "Refreshing exit node list");

        let (nodes, outcome) = fetcher::collect(self.fetcher.as_ref(), &self.sources).await;

        {
            let mut state = self.state.write().map_err(|_| RegistryError::LockPoisoned)?;
            let generation = state.generation.wrapping_add(1);
            *state = RegistryState {
                nodes,
                last_fetched: Some(Instant::now()),
                generation,
                empty_refresh: outcome.addresses == 0,
            };
        }

        if outcome.addresses == 0 {
            warn!(
                sources = outcome.sources,
                succeeded = outcome.succeeded,
                "Refresh produced no exit node addresses"
            );
            if self.fail_on_empty {
                return Err(RegistryError::EmptyRefresh {
                    sources: outcome.sources,
                });
            }
        } else {
            info!(
                exit_nodes = outcome.addresses,
                sources = outcome.sources,
                succeeded = outcome.succeeded,
                "Exit node list loaded"
            );
        }

        Ok(outcome)
    }
}

/// Registry of known Tor exit node addresses.
///
/// Queries are answered from an in-memory set. When the set is empty or
/// older than the configured refresh interval, the next query fetches every
/// source again and replaces the set before answering. Concurrent queries
/// that find the set stale share a single refresh.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ExitNodeRegistry {
    inner: Arc<Inner>,
}

impl ExitNodeRegistry {
    /// Create a registry that fetches its sources over HTTP.
    pub fn new(config: Config) -> Result<Self, RegistryError> {
        let fetcher = HttpFetcher::new(&config.http).map_err(RegistryError::Client)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Create a registry using a custom source fetcher.
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn SourceFetcher>) -> Self {
        let refresh_interval = config.refresh_interval();

        Self {
            inner: Arc::new(Inner {
                sources: config.sources,
                refresh_interval,
                fail_on_empty: config.fail_on_empty,
                fetcher,
                state: RwLock::new(RegistryState::default()),
                refresh_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Check whether `address` is a known exit node, refreshing first if stale.
    ///
    /// The address is compared verbatim against the published tokens.
    pub async fn is_exit_node(&self, address: &str) -> Result<bool, RegistryError> {
        self.refresh_if_needed().await?;
        self.read(|nodes| nodes.contains(address))
    }

    /// Every known exit node address, in no particular order.
    ///
    /// Refresh failures are logged and yield an empty list.
    pub async fn exit_nodes(&self) -> Vec<String> {
        if let Err(e) = self.refresh_if_needed().await {
            warn!(error = %e, "Failed to refresh exit node list");
            return Vec::new();
        }

        self.read(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Refresh the exit node list if it is empty or stale.
    ///
    /// Returns `None` when the current list was served as is, including when
    /// another caller finished a refresh while this one was waiting. In
    /// `fail_on_empty` mode a waiter whose shared refresh came back empty
    /// gets the same [`RegistryError::EmptyRefresh`] as the caller that ran it.
    pub async fn refresh_if_needed(&self) -> Result<Option<RefreshOutcome>, RegistryError> {
        let seen = self.staleness()?;
        if !seen.stale {
            return Ok(None);
        }

        let guard = Arc::clone(&self.inner.refresh_lock).lock_owned().await;

        let current = self.staleness()?;
        if current.generation != seen.generation {
            debug!("Exit node list refreshed by another caller");
            if current.empty_refresh && self.inner.fail_on_empty {
                return Err(RegistryError::EmptyRefresh {
                    sources: self.inner.sources.len(),
                });
            }
            return Ok(None);
        }
        if !current.stale {
            return Ok(None);
        }

        self.spawn_refresh(guard).await.map(Some)
    }

    /// Force a refresh regardless of staleness.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RegistryError> {
        let guard = Arc::clone(&self.inner.refresh_lock).lock_owned().await;
        self.spawn_refresh(guard).await
    }

    /// Number of addresses currently held.
    pub fn len(&self) -> usize {
        self.read(|nodes| nodes.len()).unwrap_or(0)
    }

    /// Whether no addresses are currently held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the last refresh cycle completed, if ever.
    pub fn last_fetched(&self) -> Option<Instant> {
        self.inner
            .state
            .read()
            .ok()
            .and_then(|state| state.last_fetched)
    }

    /// Whether the next query will trigger a refresh.
    pub fn is_stale(&self) -> bool {
        self.staleness().map(|s| s.stale).unwrap_or(true)
    }

    // Runs on its own task so the cycle completes even if the caller is dropped.
    async fn spawn_refresh(
        &self,
        guard: OwnedMutexGuard<()>,
    ) -> Result<RefreshOutcome, RegistryError> {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _guard = guard;
            inner.refresh().await
        })
        .await
        .map_err(|e| RegistryError::RefreshAborted(e.to_string()))?
    }

    fn staleness(&self) -> Result<Staleness, RegistryError> {
        let state = self
            .inner
            .state
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(Staleness {
            stale: state.is_stale(self.inner.refresh_interval),
            generation: state.generation,
            empty_refresh: state.empty_refresh,
        })
    }

    fn read<T>(&self, f: impl FnOnce(&AddressSet) -> T) -> Result<T, RegistryError> {
        let state = self
            .inner
            .state
            .read()
            .map_err(|_| RegistryError::LockPoisoned)?;
        Ok(f(&state.nodes))
    }
}

impl std::fmt::Debug for ExitNodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitNodeRegistry")
            .field("sources", &self.inner.sources)
            .field("refresh_interval", &self.inner.refresh_interval)
            .field("exit_nodes", &self.len())
            .finish()
    }
}
