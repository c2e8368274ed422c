//! JSON-over-HTTP with retry and exponential backoff.
//!
//! Shared by the embedding and generation providers:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors and timeouts → retry
//! - backoff: `base`, `2 × base`, `4 × base`, ... (capped at `2^5 × base`)

use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::debug;

/// Retry settings for one provider.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }

    /// Worst-case wall time of one call: every attempt running for
    /// `per_attempt` plus every backoff sleep in between.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let sleeps: Duration = (1..=self.max_retries).map(|a| self.delay(a)).sum();
        per_attempt * (self.max_retries + 1) + sleeps
    }
}

/// Why a request ultimately failed.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpFailure {
    Timeout,
    Status(u16, String),
    Network(String),
    Decode(String),
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpFailure::Timeout => write!(f, "request timed out"),
            HttpFailure::Status(code, body) => write!(f, "HTTP {}: {}", code, body),
            HttpFailure::Network(e) => write!(f, "connection error: {}", e),
            HttpFailure::Decode(e) => write!(f, "invalid JSON response: {}", e),
        }
    }
}

pub fn build_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` to `url` and decode the JSON response, retrying transient failures.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    body: &serde_json::Value,
    policy: RetryPolicy,
) -> Result<serde_json::Value, HttpFailure> {
    let mut last_err = HttpFailure::Network("no attempt made".to_string());

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            debug!(url, attempt, ?delay, error = %last_err, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| HttpFailure::Decode(e.to_string()));
                }
                let body_text = response.text().await.unwrap_or_default();
                last_err = HttpFailure::Status(status.as_u16(), body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    continue;
                }
                return Err(last_err);
            }
            Err(e) if e.is_timeout() => {
                last_err = HttpFailure::Timeout;
            }
            Err(e) => {
                last_err = HttpFailure::Network(e.to_string());
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10);
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(9), Duration::from_secs(32));
    }

    #[test]
    fn budget_leaves_room_for_every_retry() {
        let p = RetryPolicy::new(2);
        // 3 attempts of 30s plus 1s and 2s of backoff.
        assert_eq!(p.budget(Duration::from_secs(30)), Duration::from_secs(93));
        assert_eq!(RetryPolicy::new(0).budget(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
