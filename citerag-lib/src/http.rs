//! Blocking JSON-over-HTTP plumbing shared by the remote service clients.
//!
//! Every client is built with a request timeout, so no call can block
//! without bound. Failures are classified here and then mapped into the
//! calling component's error type.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Why a remote call failed.
#[derive(Debug, Error)]
pub(crate) enum HttpFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request error: {0}")]
    Request(String),
}

impl HttpFailure {
    /// The service could not be reached or is temporarily refusing work.
    pub(crate) fn is_unavailable(&self) -> bool {
        match self {
            HttpFailure::Timeout(_) | HttpFailure::Connect(_) => true,
            HttpFailure::Status { status, .. } => is_transient(*status),
            HttpFailure::Decode(_) | HttpFailure::Request(_) => false,
        }
    }
}

/// A JSON client for one remote service.
pub(crate) struct JsonClient {
    client: Client,
    service: &'static str,
    timeout: Duration,
    max_attempts: usize,
}

impl JsonClient {
    /// Build a client sending `headers` on every request.
    ///
    /// `max_attempts` of 1 disables retries.
    pub(crate) fn new(
        service: &'static str,
        headers: &[(&'static str, String)],
        timeout: Duration,
        max_attempts: usize,
    ) -> Result<Self> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| Error::Config(format!("invalid {name} header for {service}")))?;
            map.insert(HeaderName::from_static(*name), value);
        }
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(map)
            .build()
            .map_err(|e| Error::Config(format!("failed to build {service} HTTP client: {e}")))?;

        Ok(Self {
            client,
            service,
            timeout,
            max_attempts: max_attempts.max(1),
        })
    }

    /// POST `body` as JSON and decode the JSON response, retrying transient
    /// failures with capped exponential backoff.
    pub(crate) fn post_json<B, R>(&self, url: &str, body: &B) -> std::result::Result<R, HttpFailure>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt = 0usize;
        loop {
            match self.post_once(url, body) {
                Ok(parsed) => return Ok(parsed),
                Err(failure) if failure.is_unavailable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(service = self.service, attempt, %failure, "retrying request");
                    thread::sleep(retry_backoff(attempt));
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    fn post_once<B, R>(&self, url: &str, body: &B) -> std::result::Result<R, HttpFailure>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(service = self.service, url, "POST");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(HttpFailure::Status { status, body });
        }

        resp.json()
            .map_err(|e| HttpFailure::Decode(format!("{} response: {e}", self.service)))
    }

    fn classify(&self, err: reqwest::Error) -> HttpFailure {
        if err.is_timeout() {
            HttpFailure::Timeout(self.timeout)
        } else if err.is_connect() {
            HttpFailure::Connect(err.to_string())
        } else {
            HttpFailure::Request(err.to_string())
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
