//! Scrape and health endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::TargetList;
use crate::exposition::{CONTENT_TYPE, CachedExposition};

#[derive(Clone)]
pub struct AppState {
    pub exposition: Arc<CachedExposition>,
    pub targets: Arc<TargetList>,
    pub environment: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct Health {
    pub status: String,
    pub environment: String,
    pub version: String,
    pub servers: usize,
    /// At least one server is configured.
    pub ready: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/v1/healthcheck", get(healthcheck))
        .layer(middleware::map_response(security_headers))
        .with_state(state)
}

/// Serves the router on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.exposition.scrape() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = format!("{e:#}"), "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.targets.len();
    let health = Health {
        status: "available".to_string(),
        environment: state.environment.clone(),
        version: state.version.clone(),
        servers,
        ready: servers > 0,
    };
    let code = if health.ready {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(health))
}

async fn security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("cache-control", "no-store, no-cache, must-revalidate"),
        ("pragma", "no-cache"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-resource-policy", "same-origin"),
        ("content-security-policy", "default-src 'self'"),
    ] {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::models::ServerTarget;
    use std::time::Duration;

    fn server(id: u32) -> ServerTarget {
        ServerTarget {
            id,
            name: format!("server {id}"),
            rest_base_url: "http://oba.invalid".to_string(),
            rest_api_key: "k".to_string(),
            gtfs_url: "http://oba.invalid/gtfs.zip".to_string(),
            trip_update_url: String::new(),
            vehicle_position_url: "http://oba.invalid/vp".to_string(),
            gtfs_rt_api_key: String::new(),
            gtfs_rt_api_value: String::new(),
            agency_id: String::new(),
        }
    }

    async fn spawn(targets: Vec<ServerTarget>) -> (String, Arc<Metrics>, CancellationToken) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = AppState {
            exposition: Arc::new(CachedExposition::new(Arc::clone(&metrics), Duration::from_secs(10))),
            targets: Arc::new(TargetList::new(targets)),
            environment: "test".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, state, cancel.clone()));
        (base, metrics, cancel)
    }

    #[tokio::test]
    async fn test_healthcheck_ready() {
        let (base, _, cancel) = spawn(vec![server(1), server(2)]).await;

        let resp = reqwest::get(format!("{base}/v1/healthcheck")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");

        let health: Health = resp.json().await.unwrap();
        assert_eq!(health.status, "available");
        assert_eq!(health.environment, "test");
        assert_eq!(health.servers, 2);
        assert!(health.ready);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_healthcheck_not_ready_without_servers() {
        let (base, _, cancel) = spawn(vec![]).await;

        let resp = reqwest::get(format!("{base}/v1/healthcheck")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let health: Health = resp.json().await.unwrap();
        assert!(!health.ready);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (base, metrics, cancel) = spawn(vec![server(1)]).await;
        metrics.agencies_match.with_label_values(&["1"]).set(1.0);

        let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], CONTENT_TYPE);
        let body = resp.text().await.unwrap();
        assert!(body.contains("oba_agencies_match{server_id=\"1\"} 1"));
        cancel.cancel();
    }
}
