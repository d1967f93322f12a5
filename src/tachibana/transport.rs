//! Reliable request/response transport
//!
//! One `exchange` call is a single request/response against the provider:
//! the flat string map goes out as the query (GET) or body (POST), the
//! Shift-JIS response body comes back decoded into a generic JSON map.
//! Transport-level failures (network, timeout, non-2xx) are retried with a
//! fixed inter-attempt delay; decode failures are surfaced immediately since
//! retrying cannot fix a malformed payload. Business-level failures (a
//! non-zero result code) are not this layer's concern.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::SET_COOKIE;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::common::errors::{ClientError, Result};

/// Default number of attempts per exchange
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default fixed delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Decoded response of one successful exchange
#[derive(Debug)]
pub struct ExchangeReply {
    /// Response body parsed into a generic string-keyed map
    pub body: Map<String, Value>,
    /// Raw `Set-Cookie` header values, surfaced so login can persist them
    pub set_cookies: Vec<String>,
}

/// Builds, sends and decodes single request/response exchanges
#[derive(Debug, Clone)]
pub struct Transport {
    max_attempts: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Transport {
    pub fn new(max_attempts: u32, retry_delay: Duration, request_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            request_timeout,
        }
    }

    /// Perform one exchange with the caller-supplied client.
    ///
    /// The client must be the session-scoped one (bound to the session's own
    /// cookie jar); this layer never falls back to a shared default client.
    /// Callers are responsible for having consumed the session's sequence
    /// number before building `params`.
    #[instrument(skip(self, http, params), fields(url = url))]
    pub async fn exchange(
        &self,
        http: &Client,
        method: Method,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ExchangeReply> {
        let payload = serde_json::to_string(params)
            .map_err(|e| ClientError::Marshal(format!("request payload: {}", e)))?;

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.send_once(http, method.clone(), url, &payload).await {
                Ok((bytes, set_cookies)) => {
                    // Decode failure is a protocol mismatch, not transience:
                    // surface it without consuming further attempts.
                    let body = decode_body(&bytes)?;
                    return Ok(ExchangeReply { body, set_cookies });
                }
                Err(message) => {
                    warn!(attempt, max_attempts = self.max_attempts, %message, "exchange attempt failed");
                    last_error = message;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(ClientError::Transport {
            attempts: self.max_attempts,
            message: last_error,
        })
    }

    async fn send_once(
        &self,
        http: &Client,
        method: Method,
        url: &str,
        payload: &str,
    ) -> std::result::Result<(Vec<u8>, Vec<String>), String> {
        let request = match method {
            // The provider takes the JSON-encoded flat map as the raw query
            // string on GET, percent-encoded as a whole.
            Method::GET => {
                let query: String =
                    url::form_urlencoded::byte_serialize(payload.as_bytes()).collect();
                http.get(format!("{}?{}", url, query))
            }
            _ => http
                .request(method, url)
                .body(payload.to_string())
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        };

        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("server returned status {}", status));
        }

        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("body read error: {}", e))?;

        debug!(len = bytes.len(), "received response body");
        Ok((bytes.to_vec(), set_cookies))
    }
}

/// Decode a full Shift-JIS response body into a generic JSON map
pub fn decode_body(bytes: &[u8]) -> Result<Map<String, Value>> {
    let (text, _, had_errors) = encoding_rs::SHIFT_JIS.decode(bytes);
    if had_errors {
        return Err(ClientError::Protocol(
            "response body is not valid Shift-JIS".to_string(),
        ));
    }

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ClientError::Protocol(format!("response JSON parse error: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ClientError::Protocol(
            "response JSON is not an object".to_string(),
        )),
    }
}
