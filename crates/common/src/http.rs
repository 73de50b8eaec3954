//! Single-request HTTP client with bounded retries and proxy rotation.
//!
//! Every call walks the same loop: take a proxy from the pool, send, and
//! classify the result. Transport failures and the configured transient
//! statuses consume one attempt and move on to the next proxy; everything
//! else ends the loop. Callers get an explicit [`CallOutcome`] instead of an
//! error so a failed wallet never unwinds the batch.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::proxy_pool::ProxyPool;

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("decode error: {0}")]
    Decode(String),
}

impl CallError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status(_) => "status",
            Self::Decode(_) => "decode",
        }
    }
}

/// Result of one logical request after the retry loop has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(Value),
    /// Every attempt hit a retryable condition.
    RetryableFailure {
        attempts: u32,
        last_error: Option<CallError>,
    },
    PermanentFailure(CallError),
}

impl CallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RetryableFailure { .. } => "exhausted",
            Self::PermanentFailure(_) => "permanent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Pause between attempts; zero retries immediately.
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
    /// Count an undecodable body as a retryable attempt instead of a
    /// permanent failure.
    pub retry_decode_errors: bool,
}

impl RetryPolicy {
    pub fn is_retryable(&self, err: &CallError) -> bool {
        match err {
            CallError::Transport(_) => true,
            CallError::Status(code) => self.retry_statuses.contains(code),
            CallError::Decode(_) => self.retry_decode_errors,
        }
    }
}

/// Drive `attempt` until it succeeds, hits a permanent error, or the
/// policy's attempt budget is spent. Each attempt receives a fresh proxy.
pub async fn run_attempts<F, Fut>(
    policy: &RetryPolicy,
    pool: &ProxyPool,
    mut attempt: F,
) -> CallOutcome
where
    F: FnMut(u32, Option<String>) -> Fut,
    Fut: Future<Output = std::result::Result<Value, CallError>>,
{
    let mut last_error = None;
    for n in 1..=policy.max_retries {
        let proxy = pool.next().map(str::to_string);
        match attempt(n, proxy.clone()).await {
            Ok(v) => return CallOutcome::Success(v),
            Err(e) if policy.is_retryable(&e) => {
                warn!(
                    attempt = n,
                    max_retries = policy.max_retries,
                    proxy = proxy.as_deref().unwrap_or("direct"),
                    error = %e,
                    "retryable failure"
                );
                last_error = Some(e);
                if n == policy.max_retries {
                    break;
                }
                if !pool.is_empty() {
                    metrics::counter!("tracker_proxy_rotations_total").increment(1);
                }
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => {
                debug!(attempt = n, error = %e, "permanent failure");
                return CallOutcome::PermanentFailure(e);
            }
        }
    }
    CallOutcome::RetryableFailure {
        attempts: policy.max_retries,
        last_error,
    }
}

/// Turn a response body into JSON. A declared `Content-Encoding` is always
/// undone first, whatever the content type; the transport never decompresses.
pub fn decode_body(
    content_type: &str,
    content_encoding: &str,
    body: &[u8],
) -> std::result::Result<Value, CallError> {
    let bytes = decompress(content_encoding, body)?;
    let json_declared = content_type.contains("application/json");
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        CallError::Decode(if json_declared {
            format!("body is not utf-8: {e}")
        } else {
            format!("unexpected content type {content_type:?}: {e}")
        })
    })?;
    serde_json::from_str(text).map_err(|e| {
        CallError::Decode(if json_declared {
            format!("body is not json: {e}")
        } else {
            format!("unexpected content type {content_type:?}: {e}")
        })
    })
}

/// Undo the codings in `content_encoding`, last applied first.
fn decompress<'a>(
    content_encoding: &str,
    body: &'a [u8],
) -> std::result::Result<Cow<'a, [u8]>, CallError> {
    let mut bytes = Cow::Borrowed(body);
    for coding in content_encoding.rsplit(',').map(str::trim) {
        let coding = coding.to_ascii_lowercase();
        let mut out = Vec::new();
        let res = match coding.as_str() {
            "" | "identity" => continue,
            "br" => brotli::Decompressor::new(&*bytes, 4096).read_to_end(&mut out),
            "gzip" | "x-gzip" => flate2::read::GzDecoder::new(&*bytes).read_to_end(&mut out),
            "deflate" => flate2::read::ZlibDecoder::new(&*bytes).read_to_end(&mut out),
            other => {
                return Err(CallError::Decode(format!(
                    "unsupported content encoding {other:?}"
                )))
            }
        };
        res.map_err(|e| CallError::Decode(format!("{coding} decompression failed: {e}")))?;
        bytes = Cow::Owned(out);
    }
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
    /// Where undecodable bodies are written for later inspection.
    pub raw_dump_dir: Option<PathBuf>,
}

pub struct ResilientHttpClient {
    direct: reqwest::Client,
    proxied: HashMap<String, reqwest::Client>,
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
    raw_dump_dir: Option<PathBuf>,
}

impl ResilientHttpClient {
    pub fn new(pool: Arc<ProxyPool>, policy: RetryPolicy, settings: &HttpSettings) -> Result<Self> {
        let headers = header_map(&settings.headers)?;
        let build = |proxy: Option<&str>| -> Result<reqwest::Client> {
            let mut builder = reqwest::Client::builder()
                .timeout(settings.timeout)
                .default_headers(headers.clone());
            builder = match proxy {
                Some(p) => builder
                    .proxy(reqwest::Proxy::all(p).with_context(|| format!("invalid proxy: {p}"))?),
                None => builder.no_proxy(),
            };
            builder.build().context("failed to build HTTP client")
        };

        let direct = build(None)?;
        let mut proxied = HashMap::new();
        for endpoint in pool.endpoints() {
            proxied.insert(endpoint.clone(), build(Some(endpoint))?);
        }

        Ok(Self {
            direct,
            proxied,
            pool,
            policy,
            raw_dump_dir: settings.raw_dump_dir.clone(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn post_json(&self, endpoint: &'static str, url: &str, body: &Value) -> CallOutcome {
        self.execute(endpoint, Method::POST, url, Some(body)).await
    }

    pub async fn get_json(&self, endpoint: &'static str, url: &str) -> CallOutcome {
        self.execute(endpoint, Method::GET, url, None).await
    }

    async fn execute(
        &self,
        endpoint: &'static str,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> CallOutcome {
        let outcome = run_attempts(&self.policy, &self.pool, move |_, proxy| {
            self.send_once(endpoint, method.clone(), url, body, proxy)
        })
        .await;
        metrics::counter!(
            "tracker_http_calls_total",
            "endpoint" => endpoint,
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    async fn send_once(
        &self,
        endpoint: &'static str,
        method: Method,
        url: &str,
        body: Option<&Value>,
        proxy: Option<String>,
    ) -> std::result::Result<Value, CallError> {
        let client = proxy
            .as_deref()
            .and_then(|p| self.proxied.get(p))
            .unwrap_or(&self.direct);

        let mut req = client.request(method, url);
        if let Some(b) = body {
            req = req.json(b);
        }

        let start = Instant::now();
        let res = self.read_response(req).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("tracker_http_latency_ms", "endpoint" => endpoint).record(ms);
        let status = match &res {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("tracker_http_attempts_total", "endpoint" => endpoint, "status" => status)
            .increment(1);
        res
    }

    async fn read_response(
        &self,
        req: reqwest::RequestBuilder,
    ) -> std::result::Result<Value, CallError> {
        let resp = req
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CallError::Status(status.as_u16()));
        }

        let content_type = header_str(resp.headers(), &CONTENT_TYPE);
        let content_encoding = header_str(resp.headers(), &CONTENT_ENCODING);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        match decode_body(&content_type, &content_encoding, &bytes) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(
                    content_type = %content_type,
                    content_encoding = %content_encoding,
                    preview = %String::from_utf8_lossy(&bytes[..bytes.len().min(100)]),
                    error = %e,
                    "undecodable response body"
                );
                self.dump_raw(&bytes).await;
                Err(e)
            }
        }
    }

    async fn dump_raw(&self, bytes: &[u8]) {
        let Some(dir) = &self.raw_dump_dir else {
            return;
        };
        let name = format!(
            "problematic_response_{}.bin",
            chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f")
        );
        let path = dir.join(name);
        let res = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match res {
            Ok(()) => debug!(path = %path.display(), "saved raw response"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save raw response"),
        }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid value for header {k}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
