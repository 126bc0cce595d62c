use std::sync::Arc;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{RequestConfig, RetryPolicy};
use crate::errors::ErrorCounter;
use crate::limiter::FetchLimiter;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Non-retriable status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Giving up on {url} after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("Unexpected error while POSTing to {url}: {message}")]
    Unexpected { url: String, message: String },
}

enum AttemptError {
    Retriable(String),
    Status(u16),
}

/// JSON-over-POST client with retries, shared concurrency limit and
/// error accounting.
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    limiter: FetchLimiter,
    errors: Arc<dyn ErrorCounter>,
}

impl FetchClient {
    pub fn new(
        request: &RequestConfig,
        retry: RetryPolicy,
        limiter: FetchLimiter,
        errors: Arc<dyn ErrorCounter>,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {name}"))?;
            headers.insert(name, value);
        }
        if let Some(cookies) = request.cookie_header() {
            headers.insert(COOKIE, HeaderValue::from_str(&cookies).context("Invalid cookie value")?);
        }

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .user_agent(&request.user_agent)
            .default_headers(headers)
            .timeout(request.timeout()?)
            .build()?;

        Ok(Self {
            client,
            retry,
            limiter,
            errors,
        })
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    /// POSTs `payload` and returns the JSON object or array in the response.
    ///
    /// Retries on 5xx, timeouts, transport failures and malformed bodies. Any
    /// other non-2xx status fails at once. Every terminal failure is recorded
    /// once in the error counter.
    pub async fn post_json<P>(&self, url: &str, payload: &P) -> Result<Value, FetchError>
    where
        P: Serialize + ?Sized,
    {
        let max_attempts = self.retry.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match self.limiter.run(self.attempt(url, payload)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Unexpected error while POSTing to {url}: {e}");
                    return Err(self
                        .fail(FetchError::Unexpected {
                            url: url.to_string(),
                            message: e.to_string(),
                        })
                        .await);
                }
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(AttemptError::Status(status)) => {
                    return Err(self
                        .fail(FetchError::Status {
                            url: url.to_string(),
                            status,
                        })
                        .await);
                }
                Err(AttemptError::Retriable(reason)) if attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "Request error to {url}: {reason}, retry {attempt}/{max_attempts} after {:.2}s",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Retriable(reason)) => {
                    log::error!("Giving up on {url} after {max_attempts} attempts: {reason}");
                    return Err(self
                        .fail(FetchError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: max_attempts,
                            last: reason,
                        })
                        .await);
                }
            }
        }
    }

    async fn attempt<P>(&self, url: &str, payload: &P) -> Result<Value, AttemptError>
    where
        P: Serialize + ?Sized,
    {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| AttemptError::Retriable(describe(&e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AttemptError::Retriable(describe(&e)))?;

        if !status.is_success() {
            log::warn!(
                "Bad status {status} for {url}, body starts: {}",
                body.chars().take(200).collect::<String>()
            );
            if status.is_server_error() {
                return Err(AttemptError::Retriable(format!("Server error {status}")));
            }
            return Err(AttemptError::Status(status.as_u16()));
        }

        parse_body(&body).map_err(AttemptError::Retriable)
    }

    /// Records `err` in the error counter. The counter may touch the disk,
    /// so it runs on the blocking pool.
    async fn fail(&self, err: FetchError) -> FetchError {
        let errors = self.errors.clone();
        match tokio::task::spawn_blocking(move || errors.increment()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::error!("Couldn't record fetch failure: {e:#}"),
            Err(e) => log::error!("Error counter task failed: {e}"),
        }
        err
    }
}

/// Accepts only a JSON object or array.
pub fn parse_body(body: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        Ok(other) => Err(format!("Response is not an object or array: {other}")),
        Err(e) => Err(format!("Invalid JSON body: {e}")),
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Timeout: {e}")
    } else if e.is_connect() {
        format!("Connection failed: {e}")
    } else {
        format!("Transport error: {e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_and_arrays_are_accepted() {
        assert!(parse_body(r#"{"a": 1}"#).unwrap().is_object());
        assert!(parse_body("[1, 2]").unwrap().is_array());
    }

    #[test]
    fn scalars_and_garbage_are_rejected() {
        assert!(parse_body(r#""just a string""#).is_err());
        assert!(parse_body("42").is_err());
        assert!(parse_body("null").is_err());
        assert!(parse_body("<html>").is_err());
        assert!(parse_body("").is_err());
    }
}
