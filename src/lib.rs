//! Tor exit node detection.
//!
//! Answers one question: is this IP address a known Tor exit node? Exit
//! lists are fetched from public sources, merged into an in-memory set, and
//! refreshed when the set goes stale.
//!
//! # Features
//!
//! - **Multiple Sources** - Fetch several exit lists in parallel and merge them
//! - **Failure Tolerance** - An unreachable source is skipped for that refresh
//! - **Time-Based Cache** - Lists are refetched only once the refresh interval passes
//! - **Single Refresh** - Concurrent queries on a stale list share one fetch
//!
//! # Example Configuration
//!
//! ```yaml
//! sources:
//!   - "https://check.torproject.org/torbulkexitlist"
//! refresh_interval_seconds: 3600
//! http:
//!   timeout_ms: 3000
//! ```

pub mod config;
pub mod error;
pub mod fetcher;
pub mod registry;

pub use config::Config;
pub use error::{FetchError, RegistryError};
pub use fetcher::{AddressSet, RefreshOutcome, SourceFetcher};
pub use registry::ExitNodeRegistry;
