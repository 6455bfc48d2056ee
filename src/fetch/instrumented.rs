use std::time::Instant;

use async_trait::async_trait;
use prometheus::HistogramVec;
use reqwest::{Request, Response, Url};

use super::client::HttpClient;

/// Records outbound request latency into a `[url, method, status]` histogram.
pub struct Instrumented<C> {
    inner: C,
    latency: HistogramVec,
}

impl<C> Instrumented<C> {
    pub fn new(inner: C, latency: HistogramVec) -> Self {
        Self { inner, latency }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for Instrumented<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        let url = strip_query(req.url());
        let method = req.method().to_string();

        let start = Instant::now();
        let result = self.inner.execute(req).await;
        let elapsed = start.elapsed().as_secs_f64();

        let status = match &result {
            Ok(resp) => resp.status().as_u16().to_string(),
            Err(_) => "error".to_string(),
        };
        self.latency
            .with_label_values(&[url.as_str(), method.as_str(), status.as_str()])
            .observe(elapsed);

        result
    }
}

/// Scheme, host, port and path only. Query strings carry API keys and must
/// never reach a label or a log line.
pub fn strip_query(url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_query_drops_keys() {
        let url: Url = "https://oba.example.com:8443/api/where/current-time.json?key=secret"
            .parse()
            .unwrap();
        assert_eq!(
            strip_query(&url),
            "https://oba.example.com:8443/api/where/current-time.json"
        );
    }

    #[test]
    fn test_strip_query_default_port() {
        let url: Url = "http://feeds.example.com/vp?x=1".parse().unwrap();
        assert_eq!(strip_query(&url), "http://feeds.example.com/vp");
    }
}
