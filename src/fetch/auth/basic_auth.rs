use crate::fetch::client::HttpClient;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderValue};

/// An [`HttpClient`] wrapper that sends `Authorization: Basic ...`.
///
/// Used for the remote server-list endpoint. Credentials are validated once
/// at construction (RFC 7617: no colon in the user id, no control characters).
pub struct BasicAuth<C> {
    inner: C,
    header: HeaderValue,
}

impl<C> BasicAuth<C> {
    pub fn new(inner: C, user: &str, pass: &str) -> Result<Self> {
        if user.contains(':') {
            bail!("basic auth user must not contain ':'");
        }
        if user.chars().chain(pass.chars()).any(char::is_control) {
            bail!("basic auth credentials must not contain control characters");
        }
        let encoded = STANDARD.encode(format!("{user}:{pass}"));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}"))
            .context("invalid basic auth header")?;
        header.set_sensitive(true);
        Ok(Self { inner, header })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for BasicAuth<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(AUTHORIZATION, self.header.clone());
        self.inner.execute(req).await
    }
}
