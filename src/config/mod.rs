//! Runtime configuration and the live list of monitored servers.

mod source;

pub use source::{FileTargetSource, TargetSource, UrlTargetSource, refresh_targets};

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::models::ServerTarget;

/// Per-attempt limits for every outbound HTTP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Covers the TCP connect and the TLS handshake.
    pub connect: Duration,
    pub total: Duration,
    pub pool_idle: Duration,
    pub max_idle_per_host: usize,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            total: Duration::from_secs(10),
            pool_idle: Duration::from_secs(90),
            max_idle_per_host: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub collect_interval: Duration,
    pub bundle_refresh_interval: Duration,
    pub config_refresh_interval: Duration,
    pub eviction_interval: Duration,
    pub eviction_threshold: Duration,
    pub scrape_cache_ttl: Duration,
    /// Transport retries per outbound call; 0 retries until shutdown.
    pub max_retries: u32,
    /// Upper bound on targets collected at once; 0 means no bound.
    pub max_concurrency: usize,
    pub http: HttpTimeouts,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            collect_interval: Duration::from_secs(30),
            bundle_refresh_interval: Duration::from_secs(24 * 60 * 60),
            config_refresh_interval: Duration::from_secs(60),
            eviction_interval: Duration::from_secs(15 * 60),
            eviction_threshold: Duration::from_secs(60 * 60),
            scrape_cache_ttl: Duration::from_secs(10),
            max_retries: 3,
            max_concurrency: 0,
            http: HttpTimeouts::default(),
        }
    }
}

/// Current server list, swapped wholesale on refresh.
///
/// Readers take an `Arc` of the whole list, so a refresh landing mid-tick
/// never changes the set of targets that tick is working on.
#[derive(Debug, Default)]
pub struct TargetList {
    targets: RwLock<Arc<Vec<ServerTarget>>>,
}

impl TargetList {
    pub fn new(targets: Vec<ServerTarget>) -> Self {
        Self {
            targets: RwLock::new(Arc::new(targets)),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<ServerTarget>> {
        Arc::clone(&self.targets.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, targets: Vec<ServerTarget>) {
        let targets = Arc::new(targets);
        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
