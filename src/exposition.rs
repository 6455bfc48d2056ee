//! Cached text exposition of the metrics registry.
//!
//! A background loop re-serializes the registry every `ttl`; scrapes read the
//! cached buffer. Until the first refresh lands, a scrape renders on the spot.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::Metrics;
use crate::tasks::run_periodic;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct CachedExposition {
    metrics: Arc<Metrics>,
    ttl: Duration,
    cache: RwLock<Option<Bytes>>,
}

impl CachedExposition {
    pub fn new(metrics: Arc<Metrics>, ttl: Duration) -> Self {
        Self {
            metrics,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Re-serializes the registry into the cache.
    pub fn refresh(&self) -> Result<()> {
        let rendered = Bytes::from(self.metrics.render()?);
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(rendered);
        Ok(())
    }

    pub fn cached(&self) -> Option<Bytes> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The cached buffer, or a fresh render on a cold cache. A cold render is
    /// not stored; the refresh loop owns the cache.
    pub fn scrape(&self) -> Result<Bytes> {
        match self.cached() {
            Some(buf) => Ok(buf),
            None => Ok(Bytes::from(self.metrics.render()?)),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let ttl = self.ttl;
        run_periodic("exposition_refresh", ttl, cancel, move || {
            let this = Arc::clone(&self);
            async move {
                if let Err(e) = this.refresh() {
                    warn!(error = format!("{e:#}"), "Failed to refresh metrics exposition");
                }
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposition() -> (Arc<Metrics>, CachedExposition) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let exposition = CachedExposition::new(Arc::clone(&metrics), Duration::from_secs(10));
        (metrics, exposition)
    }

    fn text(buf: Bytes) -> String {
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_cold_scrape_renders_live() {
        let (metrics, exposition) = exposition();
        metrics.agencies_match.with_label_values(&["1"]).set(1.0);

        assert!(exposition.cached().is_none());
        assert!(text(exposition.scrape().unwrap()).contains("oba_agencies_match{server_id=\"1\"} 1"));
        assert!(exposition.cached().is_none());
    }

    #[test]
    fn test_warm_scrape_serves_cached_buffer() {
        let (metrics, exposition) = exposition();
        metrics.agencies_match.with_label_values(&["1"]).set(1.0);
        exposition.refresh().unwrap();

        metrics.agencies_match.with_label_values(&["1"]).set(0.0);

        let body = text(exposition.scrape().unwrap());
        assert!(body.contains("oba_agencies_match{server_id=\"1\"} 1"));

        exposition.refresh().unwrap();
        let body = text(exposition.scrape().unwrap());
        assert!(body.contains("oba_agencies_match{server_id=\"1\"} 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_after_ttl() {
        let (metrics, exposition) = exposition();
        let exposition = Arc::new(exposition);
        metrics.agencies_match.with_label_values(&["2"]).set(1.0);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&exposition).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(text(exposition.cached().unwrap()).contains("server_id=\"2\""));
        cancel.cancel();
        handle.await.unwrap();
    }
}
