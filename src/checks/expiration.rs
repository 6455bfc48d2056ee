use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{Check, CheckContext, Observation};
use crate::models::{ServerTarget, StaticSnapshot};

/// Publishes whole days until the earliest and latest service end dates.
pub struct BundleExpiration;

#[async_trait]
impl Check for BundleExpiration {
    fn name(&self) -> &'static str {
        "bundle_expiration"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let snapshot = ctx
            .static_store
            .get(target.id)
            .ok_or_else(|| anyhow!("no static GTFS bundle for server {}", target.id))?;

        let (earliest, latest) = days_until_expiration(&snapshot, Utc::now())?;

        let server = target.label();
        ctx.metrics
            .bundle_earliest_expiration_days
            .with_label_values(&[server.as_str()])
            .set(earliest as f64);
        ctx.metrics
            .bundle_latest_expiration_days
            .with_label_values(&[server.as_str()])
            .set(latest as f64);

        Ok(Observation::new()
            .with("earliest_days", earliest as f64)
            .with("latest_days", latest as f64))
    }
}

/// Days from `now` until the earliest and latest `end_date`, truncated toward
/// zero. End dates are taken at midnight UTC.
pub fn days_until_expiration(snapshot: &StaticSnapshot, now: DateTime<Utc>) -> Result<(i64, i64)> {
    let (earliest, latest) = snapshot
        .service_end_range()
        .ok_or_else(|| anyhow!("no services found in GTFS bundle"))?;
    Ok((days_between(now, earliest), days_between(now, latest)))
}

fn days_between(now: DateTime<Utc>, end: NaiveDate) -> i64 {
    let end = end.and_time(chrono::NaiveTime::MIN).and_utc();
    (end - now).num_hours() / 24
}
