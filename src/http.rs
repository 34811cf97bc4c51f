//! Blocking HTTP plumbing shared by the OpenAI, Qdrant and rerank clients.

use std::{thread, time::Duration};

use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
    header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};

use crate::error::{Error, Result};

/// Build a client with a JSON content type, a request timeout, and an
/// optional credential header.
pub fn build_client(timeout: Duration, auth: Option<(HeaderName, &str)>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some((name, value)) = auth {
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| Error::Config(format!("invalid value for header {name}")))?;
        headers.insert(name, value);
    }
    Ok(Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()?)
}

/// Send a request, retrying throttling, server errors and transport
/// failures with exponential backoff.
///
/// `build` is called once per attempt, so a request is sent at most
/// `max_retries + 1` times. Non-success responses that are not retried come
/// back as [`Error::Upstream`].
pub fn send_with_retry<F>(service: &'static str, max_retries: usize, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = max_retries + 1;
    let mut attempt = 0usize;
    loop {
        match build().send() {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let body = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if should_retry(status) && attempt + 1 < max_attempts {
                    attempt += 1;
                    tracing::debug!(service, %status, attempt, "retrying request");
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                return Err(Error::Upstream {
                    service,
                    status: status.as_u16(),
                    body,
                });
            }
            Err(err) => {
                if is_retryable(&err) && attempt + 1 < max_attempts {
                    attempt += 1;
                    tracing::debug!(service, attempt, "retrying after transport error: {err}");
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                return Err(err.into());
            }
        }
    }
}

pub fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Join `path` onto `base` with exactly one slash.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
