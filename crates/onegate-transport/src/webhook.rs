//! Webhook pusher: POSTs encoded events to a consumer URL.
//!
//! Bodies are signed with `X-Signature: sha1=<hex hmac>` when a secret is
//! configured. A JSON object in the response body is returned to the caller
//! as the consumer's quick-operation reply. Failed requests are logged and
//! dropped; after `failure_threshold` consecutive failures the target is
//! skipped for `suspend_for`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::ClientBuilder;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use sha1::Sha1;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use onegate_core::{ClientIdentity, EventSink, TransportError, TransportResult};

type HmacSha1 = Hmac<Sha1>;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Computes the `sha1=<hex>` signature of `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Settings for one webhook target.
#[derive(Debug, Clone)]
pub struct WebhookOptions {
    pub url: String,
    pub identity: ClientIdentity,
    pub secret: Option<String>,
    pub timeout: Duration,
    /// Consecutive failures before suspension; `0` never suspends.
    pub failure_threshold: u32,
    pub suspend_for: Duration,
}

/// Pushes events to one webhook target.
pub struct WebhookPusher {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    failure_threshold: u32,
    suspend_for: Duration,
    failures: AtomicU32,
    suspended_until: Mutex<Option<Instant>>,
}

impl WebhookPusher {
    /// Creates a pusher; the HTTP client carries the identity headers.
    pub fn new(options: WebhookOptions) -> TransportResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in options.identity.all_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
            headers.insert(name, value);
        }

        let client = ClientBuilder::new()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        Ok(Self {
            client,
            url: options.url,
            secret: options.secret.filter(|s| !s.is_empty()),
            failure_threshold: options.failure_threshold,
            suspend_for: options.suspend_for,
            failures: AtomicU32::new(0),
            suspended_until: Mutex::new(None),
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `true` while the target is being skipped.
    pub fn is_suspended(&self) -> bool {
        let mut until = self.suspended_until.lock();
        match *until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn post(&self, payload: &str) -> TransportResult<Option<Value>> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, payload.as_bytes()));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::SendFailed(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!(
                "HTTP {} from webhook",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) if !map.is_empty() => Ok(Some(Value::Object(map))),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!(url = %self.url, error = %e, "Ignoring non-JSON webhook reply");
                Ok(None)
            }
        }
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.failure_threshold > 0 && failures >= self.failure_threshold {
            *self.suspended_until.lock() = Some(Instant::now() + self.suspend_for);
            self.failures.store(0, Ordering::Relaxed);
            warn!(
                url = %self.url,
                failures = failures,
                suspend_secs = self.suspend_for.as_secs(),
                "Suspending webhook target",
            );
        }
    }
}

#[async_trait]
impl EventSink for WebhookPusher {
    fn describe(&self) -> String {
        format!("webhook {}", self.url)
    }

    async fn push(&self, payload: Arc<str>) -> Option<Value> {
        if self.is_suspended() {
            trace!(url = %self.url, "Webhook target suspended, skipping event");
            return None;
        }
        match self.post(&payload).await {
            Ok(reply) => {
                self.failures.store(0, Ordering::Relaxed);
                reply
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Webhook delivery failed");
                self.record_failure();
                None
            }
        }
    }
}
