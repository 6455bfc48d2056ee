mod basic;
mod client;
mod instrumented;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use instrumented::{Instrumented, strip_query};

use bytes::Bytes;
use reqwest::{Method, Request, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::backoff::do_with_backoff;
use crate::error::FetchError;

pub fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.split('?').next().unwrap_or_default().to_string(),
        reason: e.to_string(),
    })
}

/// GETs `url` with transport retries and returns the body of a 2xx response.
///
/// Any other status is a [`FetchError::Status`] and is not retried.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<Bytes, FetchError> {
    let req = Request::new(Method::GET, parse_url(url)?);

    let resp = do_with_backoff(cancel, client, req, max_retries).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status,
            url: strip_query(resp.url()),
        });
    }
    resp.bytes().await.map_err(FetchError::transport)
}

/// [`fetch_bytes`] followed by JSON decoding.
pub async fn fetch_json<T, C>(
    client: &C,
    url: &str,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<T, FetchError>
where
    T: DeserializeOwned,
    C: HttpClient + ?Sized,
{
    let body = fetch_bytes(client, url, cancel, max_retries).await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
        url: parse_url(url).map_or_else(|_| url.to_string(), |u| strip_query(&u)),
        reason: e.to_string(),
    })
}
