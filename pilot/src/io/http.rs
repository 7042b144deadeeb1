//! Minimal blocking HTTP GET seam.
//!
//! CI adapters only ever issue authenticated GETs, so the seam is one method.
//! Production uses a `reqwest` blocking client; tests serve canned fixtures.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Header CircleCI reads the personal API token from.
pub const CIRCLE_TOKEN_HEADER: &str = "Circle-Token";

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking GET. Transport failures are errors; non-2xx statuses are not.
pub trait HttpGet {
    fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse>;
}

/// [`HttpGet`] over `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::blocking::Client,
}

impl ReqwestHttp {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("pilot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("create HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpGet for ReqwestHttp {
    #[instrument(skip_all, fields(url))]
    fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header(CIRCLE_TOKEN_HEADER, token);
        }
        let response = request.send().with_context(|| format!("GET {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("read response body from {url}"))?;
        debug!(status, bytes = body.len(), "http response");
        Ok(HttpResponse { status, body })
    }
}
