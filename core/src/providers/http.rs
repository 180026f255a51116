//! Reqwest-backed reference adapters. Idempotent sends (send-code,
//! send-email) are retried once on network timeout per §7.

use crate::error::{Error, Result};
use crate::providers::ports::{EmailPort, SmsPort};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Builds an HTTP client, falling back to a no-proxy client if proxy
/// auto-detection panics in a sandboxed environment.
fn build_http_client(timeout: Duration) -> Client {
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client"),
    }
}

#[derive(Debug, Serialize)]
struct SendCodeRequest<'a> {
    to: &'a str,
    code: &'a str,
    expires_at: DateTime<Utc>,
}

async fn post_with_one_retry(client: &Client, url: &str, body: &impl Serialize, provider: &str) -> Result<()> {
    match client.post(url).json(body).send().await {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(Error::upstream(provider, format!("status {}", resp.status()))),
        Err(err) if err.is_timeout() => match client.post(url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(Error::upstream(provider, format!("status {} (after retry)", resp.status()))),
            Err(_) => Err(Error::provider_timeout(provider)),
        },
        Err(err) => Err(Error::upstream(provider, err.to_string())),
    }
}

pub struct HttpEmailPort {
    http: Client,
    endpoint: String,
}

impl HttpEmailPort {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: build_http_client(Duration::from_secs(10)),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EmailPort for HttpEmailPort {
    async fn send_verification_email(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        let body = SendCodeRequest { to, code, expires_at: expiry };
        post_with_one_retry(&self.http, &self.endpoint, &body, "email").await
    }
}

pub struct HttpSmsPort {
    http: Client,
    endpoint: String,
}

impl HttpSmsPort {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: build_http_client(Duration::from_secs(10)),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SmsPort for HttpSmsPort {
    async fn send_verification_sms(&self, to: &str, code: &str, expiry: DateTime<Utc>) -> Result<()> {
        let body = SendCodeRequest { to, code, expires_at: expiry };
        post_with_one_retry(&self.http, &self.endpoint, &body, "sms").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_email_port_stores_endpoint() {
        let port = HttpEmailPort::new("https://example.com/send");
        assert_eq!(port.endpoint, "https://example.com/send");
    }
}
