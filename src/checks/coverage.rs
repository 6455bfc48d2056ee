use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;

use super::{Check, CheckContext, Observation};
use crate::models::ServerTarget;

/// Compares the agency count of the static bundle with the server's
/// agencies-with-coverage list.
pub struct AgencyCoverage;

#[async_trait]
impl Check for AgencyCoverage {
    fn name(&self) -> &'static str {
        "agency_coverage"
    }

    async fn run(&self, ctx: &CheckContext, target: &ServerTarget) -> Result<Observation> {
        let server = target.label();

        let snapshot = ctx
            .static_store
            .get(target.id)
            .ok_or_else(|| anyhow!("there is no bundle for server {}", target.id))?;
        if snapshot.agencies.is_empty() {
            bail!("no agencies found in GTFS bundle for server {}", target.id);
        }
        let in_static = snapshot.agencies.len();
        ctx.metrics
            .agencies_in_static_gtfs
            .with_label_values(&[server.as_str()])
            .set(in_static as f64);

        let in_coverage = ctx
            .rest(target)
            .agencies_with_coverage()
            .await
            .context("failed to fetch agencies with coverage")?
            .len();
        ctx.metrics
            .agencies_in_coverage_endpoint
            .with_label_values(&[server.as_str()])
            .set(in_coverage as f64);

        let matched = if in_static == in_coverage { 1.0 } else { 0.0 };
        ctx.metrics
            .agencies_match
            .with_label_values(&[server.as_str()])
            .set(matched);

        Ok(Observation::new()
            .with("static", in_static as f64)
            .with("coverage", in_coverage as f64)
            .with("match", matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::{context, rendered, target};
    use crate::models::{Agency, StaticSnapshot};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agencies(n: usize) -> Vec<Agency> {
        (0..n)
            .map(|i| Agency {
                id: Some(i.to_string()),
                name: format!("Agency {i}"),
            })
            .collect()
    }

    async fn serve_coverage(server: &MockServer, n: usize) {
        let list: Vec<_> = (0..n)
            .map(|i| serde_json::json!({"agencyId": i.to_string()}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/where/agencies-with-coverage.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"list": list}})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_counts_disagree() {
        let server = MockServer::start().await;
        serve_coverage(&server, 3).await;
        let ctx = context();
        ctx.static_store
            .set(1, StaticSnapshot::new(vec![], agencies(2), vec![]));

        let obs = AgencyCoverage
            .run(&ctx, &target(1, &server.uri()))
            .await
            .unwrap();

        assert_eq!(obs.get("match"), Some(0.0));
        let text = rendered(&ctx);
        assert!(text.contains("oba_agencies_in_static_gtfs{server_id=\"1\"} 2"));
        assert!(text.contains("oba_agencies_in_coverage_endpoint{server_id=\"1\"} 3"));
        assert!(text.contains("oba_agencies_match{server_id=\"1\"} 0"));
    }

    #[tokio::test]
    async fn test_missing_bundle_skips_api_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = AgencyCoverage
            .run(&context(), &target(1, &server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("there is no bundle"));
    }

    #[tokio::test]
    async fn test_bundle_without_agencies() {
        let ctx = context();
        ctx.static_store.set(1, StaticSnapshot::default());

        let err = AgencyCoverage
            .run(&ctx, &target(1, "http://oba.invalid"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no agencies found"));
    }
}
