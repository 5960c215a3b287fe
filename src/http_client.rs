use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ApiError, ApiResult};

const REQUEST_TIMEOUT_SECS: u64 = 10;

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// One outbound GET. Implementations do not retry; `send_with_retry` does.
pub trait Transport: Send + Sync {
    fn get(&self, req: &HttpRequest) -> ApiResult<HttpResponse>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransport;

impl Transport for ReqwestTransport {
    fn get(&self, req: &HttpRequest) -> ApiResult<HttpResponse> {
        let client = http_client().map_err(|err| ApiError::Transport(err.to_string()))?;
        let mut builder = client
            .get(&req.url)
            .header(USER_AGENT, "Mozilla/5.0")
            .header(ACCEPT, "application/json");
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder
            .send()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = resp
            .text()
            .map_err(|err| ApiError::Transport(format!("failed reading body: {err}")))?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Sends `req` under `policy`.
///
/// * 2xx returns the body.
/// * 404 returns `Ok(None)` without retrying.
/// * 429 waits `Retry-After` seconds when the header parses, otherwise `base * 2^attempt`.
/// * Anything else (other status, transport failure) backs off the same way.
///
/// After `max_attempts` the last failure is returned.
pub fn send_with_retry(
    transport: &dyn Transport,
    req: &HttpRequest,
    policy: &RetryPolicy,
) -> ApiResult<Option<String>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = ApiError::Transport("no attempt made".to_string());

    for attempt in 0..max_attempts {
        let is_last = attempt + 1 == max_attempts;
        let delay = match transport.get(req) {
            Ok(resp) if resp.status == 429 => {
                last_err = ApiError::RateLimited {
                    attempts: attempt + 1,
                };
                let delay = resp
                    .retry_after
                    .as_deref()
                    .and_then(parse_retry_after)
                    .unwrap_or_else(|| policy.backoff(attempt));
                warn!(
                    url = %req.url,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited (429)"
                );
                delay
            }
            Ok(resp) if resp.status == 404 => {
                debug!(url = %req.url, "not found (404)");
                return Ok(None);
            }
            Ok(resp) if (200..300).contains(&resp.status) => return Ok(Some(resp.body)),
            Ok(resp) => {
                last_err = ApiError::Upstream {
                    status: resp.status,
                };
                policy.backoff(attempt)
            }
            Err(err) => {
                last_err = err;
                policy.backoff(attempt)
            }
        };

        if is_last {
            break;
        }
        if !matches!(last_err, ApiError::RateLimited { .. }) {
            warn!(
                url = %req.url,
                attempt = attempt + 1,
                max_attempts,
                error = %last_err,
                "request failed, retrying"
            );
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    warn!(url = %req.url, max_attempts, error = %last_err, "request failed after all attempts");
    Err(last_err)
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    struct Scripted {
        responses: Mutex<VecDeque<ApiResult<HttpResponse>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(responses: Vec<ApiResult<HttpResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl Transport for Scripted {
        fn get(&self, _req: &HttpRequest) -> ApiResult<HttpResponse> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Transport("script exhausted".to_string())))
        }
    }

    fn status(code: u16) -> ApiResult<HttpResponse> {
        Ok(HttpResponse {
            status: code,
            retry_after: None,
            body: format!("{{\"status\":{code}}}"),
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn not_found_returns_none_without_retry() {
        let transport = Scripted::new(vec![status(404), status(200)]);
        let out = send_with_retry(&transport, &HttpRequest::get("u"), &fast_policy());
        assert_eq!(out, Ok(None));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn rate_limit_honours_retry_after_then_succeeds() {
        let limited = Ok(HttpResponse {
            status: 429,
            retry_after: Some("0".to_string()),
            body: String::new(),
        });
        let transport = Scripted::new(vec![limited, status(200)]);
        let out = send_with_retry(&transport, &HttpRequest::get("u"), &fast_policy()).unwrap();
        assert!(out.is_some());
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn server_errors_exhaust_attempt_cap() {
        let transport = Scripted::new(vec![status(500); 6]);
        let out = send_with_retry(&transport, &HttpRequest::get("u"), &fast_policy());
        assert_eq!(out, Err(ApiError::Upstream { status: 500 }));
        assert_eq!(transport.calls(), 5);
    }

    #[test]
    fn persistent_rate_limit_reports_attempts() {
        let transport = Scripted::new(vec![status(429); 5]);
        let out = send_with_retry(&transport, &HttpRequest::get("u"), &fast_policy());
        assert_eq!(out, Err(ApiError::RateLimited { attempts: 5 }));
    }

    #[test]
    fn transport_error_is_retried() {
        let transport = Scripted::new(vec![
            Err(ApiError::Transport("reset".to_string())),
            status(200),
        ]);
        let out = send_with_retry(&transport, &HttpRequest::get("u"), &fast_policy()).unwrap();
        assert!(out.is_some());
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn retry_after_parses_whole_seconds_only() {
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
