//! Shared JSON API client for the datasource readers.
//!
//! Every remote datasource talks to its API through [`ApiClient`]: a thin
//! wrapper around `reqwest` that joins paths onto a base URL, attaches
//! auth, enforces a minimum delay between requests, and retries transient
//! failures (429, 5xx, network errors) with exponential backoff. Other 4xx
//! responses fail immediately since retrying them cannot help.

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Authentication attached to every request.
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
    headers: Vec<(String, String)>,
    max_retries: u32,
    rate_limit_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Auth::None,
            headers: Vec::new(),
            max_retries: 3,
            rate_limit_delay: Duration::ZERO,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Minimum delay between consecutive requests from this client.
    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request_json(reqwest::Method::GET, path, query, None)
            .await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.request_json(reqwest::Method::POST, path, &[], Some(body))
            .await
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = join_url(&self.base_url, path);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(backoff).await;
            }
            self.apply_rate_limit().await;

            let mut request = self.client.request(method.clone(), &url);
            if !query.is_empty() {
                request = request.query(query);
            }
            match &self.auth {
                Auth::None => {}
                Auth::Bearer(token) => request = request.bearer_auth(token),
                Auth::Basic { username, password } => {
                    request = request.basic_auth(username, Some(password))
                }
            }
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .with_context(|| format!("Invalid JSON from {}", url));
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        eprintln!(
                            "Warning: {} returned {}, retrying (attempt {}/{})",
                            url,
                            status,
                            attempt + 1,
                            self.max_retries
                        );
                        continue;
                    }
                    let error_body = response.text().await.unwrap_or_default();
                    anyhow::bail!("Request to {} failed with {}: {}", url, status, error_body);
                }
                Err(e) => {
                    if attempt == self.max_retries {
                        return Err(e).with_context(|| format!("Request to {} failed", url));
                    }
                    eprintln!(
                        "Warning: request to {} failed ({}), retrying (attempt {}/{})",
                        url,
                        e,
                        attempt + 1,
                        self.max_retries
                    );
                }
            }
        }

        anyhow::bail!(
            "Request to {} failed after {} retries",
            url,
            self.max_retries
        )
    }

    async fn apply_rate_limit(&self) {
        if self.rate_limit_delay.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit_delay {
                tokio::time::sleep(self.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_slashes() {
        assert_eq!(join_url("https://x.test/api", "/v1/items"), "https://x.test/api/v1/items");
        assert_eq!(join_url("https://x.test/api", "v1/items"), "https://x.test/api/v1/items");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("https://x.test/api/").unwrap();
        assert_eq!(client.base_url, "https://x.test/api");
    }
}
