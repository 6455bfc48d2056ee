//! Client for the REST API of a monitored server.
//!
//! All endpoints live under `{base}/api/where/` and authenticate with a `key`
//! query parameter. Responses share an envelope of `{"data": {"entry": ..}}`
//! or `{"data": {"list": [..]}}`.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::fetch::auth::UrlParam;
use crate::fetch::{HttpClient, fetch_json};
use crate::models::ServerTarget;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct EntryData<T> {
    entry: T,
}

#[derive(Debug, Deserialize)]
struct ListData<T> {
    #[serde(default)]
    list: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentTime {
    #[serde(rename = "readableTime", default)]
    pub readable_time: String,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgencyCoverage {
    #[serde(rename = "agencyId", default)]
    pub agency_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleStatus {
    #[serde(rename = "vehicleId", default)]
    pub vehicle_id: String,
}

/// Per-agency counters exposed by `metrics.json`. Maps are keyed by agency id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMetrics {
    pub agencies_with_coverage_count: i64,
    #[serde(rename = "agencyIDs")]
    pub agency_ids: Vec<String>,
    pub realtime_records_total: HashMap<String, i64>,
    pub realtime_trip_counts_matched: HashMap<String, i64>,
    pub realtime_trip_counts_unmatched: HashMap<String, i64>,
    pub scheduled_trips_count: HashMap<String, i64>,
    #[serde(rename = "stopIDsMatchedCount")]
    pub stop_ids_matched_count: HashMap<String, i64>,
    #[serde(rename = "stopIDsUnmatched")]
    pub stop_ids_unmatched: HashMap<String, Vec<String>>,
    #[serde(rename = "stopIDsUnmatchedCount")]
    pub stop_ids_unmatched_count: HashMap<String, i64>,
    pub time_since_last_realtime_update: HashMap<String, i64>,
}

pub struct RestApi<'a> {
    client: UrlParam<&'a dyn HttpClient>,
    base_url: &'a str,
    cancel: &'a CancellationToken,
    max_retries: u32,
}

impl<'a> RestApi<'a> {
    pub fn new(
        client: &'a dyn HttpClient,
        target: &'a ServerTarget,
        cancel: &'a CancellationToken,
        max_retries: u32,
    ) -> Self {
        Self {
            client: UrlParam::rest_key(client, &target.rest_api_key),
            base_url: target.rest_base_url.trim_end_matches('/'),
            cancel,
            max_retries,
        }
    }

    /// `{base}/api/where/{path}`, without the key.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/where/{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let envelope: Envelope<T> =
            fetch_json(&self.client, &self.endpoint(path), self.cancel, self.max_retries).await?;
        Ok(envelope.data)
    }

    pub async fn current_time(&self) -> Result<CurrentTime, FetchError> {
        let data: EntryData<CurrentTime> = self.get("current-time.json").await?;
        Ok(data.entry)
    }

    pub async fn agencies_with_coverage(&self) -> Result<Vec<AgencyCoverage>, FetchError> {
        let data: ListData<AgencyCoverage> = self.get("agencies-with-coverage.json").await?;
        Ok(data.list)
    }

    pub async fn vehicles_for_agency(&self, agency_id: &str) -> Result<Vec<VehicleStatus>, FetchError> {
        let data: ListData<VehicleStatus> = self
            .get(&format!("vehicles-for-agency/{agency_id}.json"))
            .await?;
        Ok(data.list)
    }

    /// A 404 means the server predates the metrics endpoint, which is reported
    /// as its own error rather than a generic status failure.
    pub async fn metrics(&self) -> Result<ServerMetrics> {
        match self.get::<EntryData<ServerMetrics>>("metrics.json").await {
            Ok(data) => Ok(data.entry),
            Err(FetchError::Status { status, .. }) if status == StatusCode::NOT_FOUND => Err(anyhow!(
                "server {} does not support metrics API",
                self.base_url
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpTimeouts;
    use crate::fetch::BasicClient;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(base: &str) -> ServerTarget {
        ServerTarget {
            id: 1,
            name: "test".to_string(),
            rest_base_url: format!("{base}/"),
            rest_api_key: "TEST".to_string(),
            gtfs_url: String::new(),
            trip_update_url: String::new(),
            vehicle_position_url: String::new(),
            gtfs_rt_api_key: String::new(),
            gtfs_rt_api_value: String::new(),
            agency_id: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_current_time_sends_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/where/current-time.json"))
            .and(query_param("key", "TEST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": {"entry": {"readableTime": "2025-01-01T00:00:00-08:00", "time": 1735718400000i64}}
            })))
            .mount(&server)
            .await;

        let client = BasicClient::new(&HttpTimeouts::default()).unwrap();
        let target = target(&server.uri());
        let cancel = CancellationToken::new();
        let api = RestApi::new(&client, &target, &cancel, 1);

        let time = api.current_time().await.unwrap();
        assert_eq!(time.readable_time, "2025-01-01T00:00:00-08:00");
    }

    #[tokio::test]
    async fn test_lists_and_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/where/vehicles-for-agency/1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"list": [{"vehicleId": "1_1"}, {"vehicleId": "1_2"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/where/metrics.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"entry": {
                    "agenciesWithCoverageCount": 1,
                    "agencyIDs": ["1"],
                    "realtimeTripCountsMatched": {"1": 30},
                    "realtimeTripCountsUnmatched": {"1": 10},
                    "stopIDsUnmatched": {"1": ["A", "B"]}
                }}
            })))
            .mount(&server)
            .await;

        let client = BasicClient::new(&HttpTimeouts::default()).unwrap();
        let target = target(&server.uri());
        let cancel = CancellationToken::new();
        let api = RestApi::new(&client, &target, &cancel, 1);

        assert_eq!(api.vehicles_for_agency("1").await.unwrap().len(), 2);

        let metrics = api.metrics().await.unwrap();
        assert_eq!(metrics.agency_ids, vec!["1"]);
        assert_eq!(metrics.realtime_trip_counts_matched["1"], 30);
        assert_eq!(metrics.stop_ids_unmatched["1"].len(), 2);
        assert!(metrics.scheduled_trips_count.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_not_supported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/where/metrics.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = BasicClient::new(&HttpTimeouts::default()).unwrap();
        let target = target(&server.uri());
        let cancel = CancellationToken::new();
        let api = RestApi::new(&client, &target, &cancel, 1);

        let err = api.metrics().await.unwrap_err();
        assert!(err.to_string().contains("does not support metrics API"));
    }
}
