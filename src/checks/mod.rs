//! Per-target checks and the pipeline that runs them in order.
//!
//! Each check is a uniform `(context, target) -> observation` operation.
//! A failing check is reported and the pipeline moves on, except for a
//! critical check: every later step depends on what it produced, so its
//! failure ends the run for that target.

mod coverage;
mod expiration;
mod ping;
mod realtime;
mod rest_metrics;
mod telemetry;
mod validity;
mod vehicle_count;

pub use coverage::AgencyCoverage;
pub use expiration::{BundleExpiration, days_until_expiration};
pub use ping::Ping;
pub use realtime::{RealtimeFeed, fetch_realtime};
pub use rest_metrics::RestMetrics;
pub use telemetry::{TelemetryUpdate, VehicleTelemetry, reconcile};
pub use validity::{PositionValidity, ValidityScore, score_positions};
pub use vehicle_count::VehicleCount;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::fetch::HttpClient;
use crate::metrics::Metrics;
use crate::models::ServerTarget;
use crate::oba::RestApi;
use crate::report::{ErrorReporter, ReportOptions};
use crate::store::{BoundingBoxStore, RealtimeStore, StaticStore};
use crate::telemetry::TelemetryStore;

/// Shared handles every check runs against.
pub struct CheckContext {
    pub client: Arc<dyn HttpClient>,
    pub metrics: Arc<Metrics>,
    pub static_store: Arc<StaticStore>,
    pub realtime_store: Arc<RealtimeStore>,
    pub bbox_store: Arc<BoundingBoxStore>,
    pub telemetry: Arc<TelemetryStore>,
    pub cancel: CancellationToken,
    pub max_retries: u32,
}

impl CheckContext {
    pub fn rest<'a>(&'a self, target: &'a ServerTarget) -> RestApi<'a> {
        RestApi::new(self.client.as_ref(), target, &self.cancel, self.max_retries)
    }
}

/// Named values a check derived during one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    values: BTreeMap<&'static str, f64>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: f64) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    /// A failed critical check skips the rest of the pipeline for the target.
    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub check: &'static str,
    pub result: Result<Observation, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub server_id: u32,
    pub outcomes: Vec<CheckOutcome>,
    /// The critical check whose failure ended the run early.
    pub short_circuited: Option<&'static str>,
    pub cancelled: bool,
}

impl TargetReport {
    pub fn new(server_id: u32) -> Self {
        Self {
            server_id,
            outcomes: Vec::new(),
            short_circuited: None,
            cancelled: false,
        }
    }

    /// True when every step ran, whether or not it succeeded.
    pub fn completed(&self) -> bool {
        self.short_circuited.is_none() && !self.cancelled
    }

    pub fn outcome(&self, check: &str) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.check == check)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

pub struct Pipeline {
    checks: Vec<Box<dyn Check>>,
}

impl Pipeline {
    pub fn new(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    /// ping, expiration, coverage, REST metrics, realtime fetch, vehicle
    /// count, telemetry, validity.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(Ping),
            Box::new(BundleExpiration),
            Box::new(AgencyCoverage),
            Box::new(RestMetrics),
            Box::new(RealtimeFeed),
            Box::new(VehicleCount),
            Box::new(VehicleTelemetry),
            Box::new(PositionValidity),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Runs every check in order for one target. Errors are forwarded to
    /// `reporter` tagged with the target and check name.
    pub async fn run(
        &self,
        ctx: &CheckContext,
        target: &ServerTarget,
        reporter: &dyn ErrorReporter,
    ) -> TargetReport {
        let mut report = TargetReport::new(target.id);

        for check in &self.checks {
            if ctx.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let name = check.name();
            let span = debug_span!("check", check = name);
            match check.run(ctx, target).instrument(span).await {
                Ok(observation) => {
                    debug!(check = name, ?observation, "Check passed");
                    report.outcomes.push(CheckOutcome {
                        check: name,
                        result: Ok(observation),
                    });
                }
                Err(e) => {
                    warn!(check = name, error = format!("{e:#}"), "Check failed");
                    reporter.report(
                        &e,
                        &ReportOptions::new()
                            .tag("server_id", target.label())
                            .tag("server_name", target.name.clone())
                            .tag("check", name),
                    );
                    report.outcomes.push(CheckOutcome {
                        check: name,
                        result: Err(format!("{e:#}")),
                    });
                    if check.is_critical() {
                        report.short_circuited = Some(name);
                        break;
                    }
                }
            }
        }

        report
    }
}
