//! Outbound request seam and its reqwest implementation

use crate::auth::VCC_API_KEY_HEADER;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use std::time::{Duration, Instant};

/// Status, body and timing of one round trip
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Sends one authorized GET; implementations must enforce a timeout
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &[(String, String)], bearer: &str)
    -> Result<RawResponse>;
}

/// HTTPS transport against the Volvo API gateway
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        bearer: &str,
    ) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();
        let resp = self
            .client
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .header(VCC_API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
            .header(
                USER_AGENT,
                concat!("volvo-connector/", env!("APP_VERSION")),
            )
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse {
            status,
            body,
            elapsed: started.elapsed(),
        })
    }
}
