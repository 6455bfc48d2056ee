//! Tick-driven fan-out of the check pipeline over every target.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backoff::BackoffStore;
use crate::checks::{CheckContext, Pipeline, TargetReport};
use crate::config::TargetList;
use crate::report::ErrorReporter;
use crate::tasks::run_periodic;

pub struct Orchestrator {
    ctx: Arc<CheckContext>,
    pipeline: Arc<Pipeline>,
    targets: Arc<TargetList>,
    throttle: Arc<BackoffStore>,
    reporter: Arc<dyn ErrorReporter>,
    semaphore: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    /// `max_concurrency = 0` runs every target at once.
    pub fn new(
        ctx: Arc<CheckContext>,
        pipeline: Pipeline,
        targets: Arc<TargetList>,
        throttle: Arc<BackoffStore>,
        reporter: Arc<dyn ErrorReporter>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            ctx,
            pipeline: Arc::new(pipeline),
            targets,
            throttle,
            reporter,
            semaphore: (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency))),
        }
    }

    pub fn throttle(&self) -> &BackoffStore {
        &self.throttle
    }

    /// Runs the pipeline once for every target that is not backing off and
    /// waits for all of them. Reports come back sorted by server id.
    pub async fn tick(&self) -> Vec<TargetReport> {
        let targets = self.targets.snapshot();
        let now = Utc::now();
        let mut tasks = Vec::with_capacity(targets.len());

        for target in targets.iter() {
            if self.throttle.is_throttled(target.id, now) {
                debug!(
                    server_id = target.id,
                    next_retry_at = ?self.throttle.next_retry_at(target.id),
                    "Target is backing off, skipping this tick"
                );
                continue;
            }

            let ctx = Arc::clone(&self.ctx);
            let pipeline = Arc::clone(&self.pipeline);
            let reporter = Arc::clone(&self.reporter);
            let semaphore = self.semaphore.clone();
            let target = target.clone();

            let span = info_span!(
                "collect",
                server_id = target.id,
                server_name = %target.name,
            );

            let task = tokio::spawn(
                async move {
                    let _permit = match semaphore {
                        Some(sem) => match sem.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => return None,
                        },
                        None => None,
                    };
                    let report = pipeline.run(&ctx, &target, reporter.as_ref()).await;
                    debug!(failures = report.failures(), "Target collected");
                    Some(report)
                }
                .instrument(span),
            );
            tasks.push(task);
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Collection task panicked"),
            }
        }

        for report in &reports {
            if let Some(check) = report.short_circuited {
                self.throttle.update_backoff(report.server_id);
                warn!(
                    server_id = report.server_id,
                    check,
                    next_retry_at = ?self.throttle.next_retry_at(report.server_id),
                    "Critical check failed, backing off target"
                );
            } else if report.completed() {
                self.throttle.reset_backoff(report.server_id);
            }
        }

        reports.sort_by_key(|r| r.server_id);
        reports
    }

    /// Collects immediately, then every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(
            interval_secs = interval.as_secs(),
            targets = self.targets.len(),
            "Starting collection loop"
        );
        if self.ctx.cancel.is_cancelled() {
            return;
        }
        self.tick().await;

        let cancel = self.ctx.cancel.clone();
        run_periodic("collect", interval, cancel, move || {
            let this = Arc::clone(&self);
            async move {
                this.tick().await;
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::{context, target};
    use crate::checks::{Check, Observation};
    use crate::models::ServerTarget;
    use crate::report::RecordingReporter;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails for the listed server ids.
    struct FailFor {
        ids: Vec<u32>,
        critical: bool,
    }

    #[async_trait]
    impl Check for FailFor {
        fn name(&self) -> &'static str {
            "fail_for"
        }

        fn is_critical(&self) -> bool {
            self.critical
        }

        async fn run(&self, _ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
            if self.ids.contains(&target.id) {
                bail!("server {} is down", target.id);
            }
            Ok(Observation::new())
        }
    }

    /// Records which targets reached it.
    struct Visits(Arc<Mutex<Vec<u32>>>);

    #[async_trait]
    impl Check for Visits {
        fn name(&self) -> &'static str {
            "visits"
        }

        async fn run(&self, _ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
            self.0.lock().unwrap().push(target.id);
            Ok(Observation::new())
        }
    }

    /// Tracks peak concurrency.
    struct Gate {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Check for Arc<Gate> {
        fn name(&self) -> &'static str {
            "gate"
        }

        async fn run(&self, _ctx: &CheckContext, _target: &ServerTarget) -> Result<Observation> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Observation::new())
        }
    }

    fn targets(ids: &[u32]) -> Arc<TargetList> {
        Arc::new(TargetList::new(
            ids.iter().map(|&id| target(id, "http://oba.invalid")).collect(),
        ))
    }

    fn orchestrator(pipeline: Pipeline, ids: &[u32], max_concurrency: usize) -> Orchestrator {
        Orchestrator::new(
            Arc::new(context()),
            pipeline,
            targets(ids),
            Arc::new(BackoffStore::new()),
            Arc::new(RecordingReporter::new()),
            max_concurrency,
        )
    }

    #[tokio::test]
    async fn test_failing_target_does_not_affect_others() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Box::new(FailFor {
                ids: vec![2],
                critical: true,
            }),
            Box::new(Visits(Arc::clone(&visits))),
        ]);
        let orch = orchestrator(pipeline, &[3, 1, 2], 0);

        let reports = orch.tick().await;

        let ids: Vec<_> = reports.iter().map(|r| r.server_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(reports[1].short_circuited, Some("fail_for"));

        let mut visited = visits.lock().unwrap().clone();
        visited.sort();
        assert_eq!(visited, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_short_circuit_arms_throttle_and_skips_next_tick() {
        let pipeline = Pipeline::new(vec![Box::new(FailFor {
            ids: vec![2],
            critical: true,
        })]);
        let orch = orchestrator(pipeline, &[1, 2], 0);

        orch.tick().await;
        assert!(orch.throttle().next_retry_at(2).is_some());
        assert!(orch.throttle().next_retry_at(1).is_none());

        let second = orch.tick().await;
        let ids: Vec<_> = second.iter().map(|r| r.server_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_completed_run_resets_throttle() {
        let pipeline = Pipeline::new(vec![Box::new(FailFor {
            ids: vec![1],
            critical: false,
        })]);
        let orch = orchestrator(pipeline, &[1], 0);
        orch.throttle().update_backoff(1);
        orch.throttle().reset_backoff(1);
        orch.throttle().update_backoff(7);

        let reports = orch.tick().await;

        assert_eq!(reports[0].failures(), 1);
        assert!(reports[0].completed());
        assert!(orch.throttle().next_retry_at(1).is_none());
        assert!(orch.throttle().next_retry_at(7).is_some());
    }

    #[tokio::test]
    async fn test_semaphore_bounds_fan_out() {
        let gate = Arc::new(Gate {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(vec![Box::new(Arc::clone(&gate))]);
        let orch = orchestrator(pipeline, &[1, 2, 3, 4, 5, 6], 2);

        let reports = orch.tick().await;

        assert_eq!(reports.len(), 6);
        assert!(gate.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![Box::new(Visits(Arc::clone(&visits)))]);
        let orch = Arc::new(orchestrator(pipeline, &[1], 0));
        let cancel = orch.ctx.cancel.clone();

        let handle = tokio::spawn(Arc::clone(&orch).run(Duration::from_secs(3600)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*visits.lock().unwrap(), vec![1]);
    }
}
