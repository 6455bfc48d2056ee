//! Static bundle download, parsing and periodic refresh.

pub mod bundle;

pub use bundle::{parse_gtfs_date, parse_static_bundle};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TargetList;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::geo::compute_bounding_box;
use crate::models::{ServerTarget, StaticSnapshot};
use crate::report::{ErrorReporter, ReportOptions};
use crate::store::{BoundingBoxStore, StaticStore};
use crate::tasks::run_periodic;

/// Downloads a bundle with transport retries and parses it off the async runtime.
pub async fn download_bundle<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<StaticSnapshot> {
    let bytes = fetch_bytes(client, url, cancel, max_retries)
        .await
        .context("failed to download GTFS bundle")?;
    tokio::task::spawn_blocking(move || parse_static_bundle(&bytes))
        .await
        .context("bundle parser task failed")?
        .context("failed to parse GTFS bundle")
}

pub struct BundleRefresher {
    client: Arc<dyn HttpClient>,
    static_store: Arc<StaticStore>,
    bbox_store: Arc<BoundingBoxStore>,
    reporter: Arc<dyn ErrorReporter>,
    cancel: CancellationToken,
    max_retries: u32,
}

impl BundleRefresher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        static_store: Arc<StaticStore>,
        bbox_store: Arc<BoundingBoxStore>,
        reporter: Arc<dyn ErrorReporter>,
        cancel: CancellationToken,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            static_store,
            bbox_store,
            reporter,
            cancel,
            max_retries,
        }
    }

    /// Downloads, parses and stores one target's bundle, then its bounding box.
    ///
    /// The two stores are written one after the other. A bundle without any
    /// usable stop coordinates is still stored; only the box is skipped.
    #[tracing::instrument(skip_all, fields(server_id = target.id, server_name = %target.name))]
    pub async fn refresh_bundle(&self, target: &ServerTarget) -> Result<()> {
        let snapshot = download_bundle(
            self.client.as_ref(),
            &target.gtfs_url,
            &self.cancel,
            self.max_retries,
        )
        .await?;

        let bbox = compute_bounding_box(&snapshot.stops);
        info!(
            stops = snapshot.stops.len(),
            agencies = snapshot.agencies.len(),
            "Stored GTFS bundle"
        );
        self.static_store.set(target.id, snapshot);

        match bbox {
            Ok(bbox) => {
                info!(?bbox, "Computed bounding box");
                self.bbox_store.set(target.id, bbox);
            }
            Err(e) => warn!(error = %e, "Could not compute bounding box"),
        }
        Ok(())
    }

    /// Refreshes every target in turn. Failures are reported per target.
    pub async fn refresh_all(&self, targets: &[ServerTarget]) {
        for target in targets {
            if self.cancel.is_cancelled() {
                return;
            }
            self.refresh_reporting(target).await;
        }
    }

    /// Refreshes only targets that have no bundle yet, e.g. ones added by a
    /// server-list reload.
    pub async fn refresh_missing(&self, targets: &[ServerTarget]) {
        for target in targets {
            if self.cancel.is_cancelled() {
                return;
            }
            if self.static_store.get(target.id).is_none() {
                self.refresh_reporting(target).await;
            }
        }
    }

    async fn refresh_reporting(&self, target: &ServerTarget) {
        if let Err(e) = self.refresh_bundle(target).await {
            error!(server_id = target.id, error = format!("{e:#}"), "Failed to refresh GTFS bundle");
            self.reporter.report(
                &e,
                &ReportOptions::new()
                    .tag("server_id", target.label())
                    .extra("gtfs_url", target.gtfs_url.clone()),
            );
        }
    }

    /// Re-downloads every bundle each `period` until cancelled.
    pub async fn run(self: Arc<Self>, targets: Arc<TargetList>, period: Duration) {
        let cancel = self.cancel.clone();
        run_periodic("bundle_refresh", period, cancel, move || {
            let this = Arc::clone(&self);
            let targets = targets.snapshot();
            async move {
                info!(servers = targets.len(), "Refreshing GTFS bundles");
                this.refresh_all(&targets).await;
            }
        })
        .await;
    }
}
