//! Cached, retrying JSON GET requests against exchange REST APIs

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use pricehub_core::{Clock, ExchangeError, ExchangeErrorKind, ExchangeId, ExchangeResult, HttpConfig};

use crate::cache::{CacheKey, ResponseCache};

/// Raw bodies attached to errors are cut to this many bytes
const MAX_RAW_BODY: usize = 2048;

/// Upper bound for a single liveness check
pub const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// One GET request against an exchange
#[derive(Debug, Clone)]
pub struct ExchangeRequest<'a> {
    pub exchange: ExchangeId,
    pub base_url: &'a str,
    pub endpoint: &'a str,
    pub params: Vec<(&'static str, String)>,
    pub symbol: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

impl<'a> ExchangeRequest<'a> {
    pub fn new(exchange: ExchangeId, base_url: &'a str, endpoint: &'a str) -> Self {
        Self {
            exchange,
            base_url,
            endpoint,
            params: vec![],
            symbol: None,
            api_key: None,
        }
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn symbol(mut self, symbol: &'a str) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn api_key(mut self, key: Option<&'a str>) -> Self {
        self.api_key = key;
        self
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoint)
    }

    fn cache_key(&self) -> CacheKey {
        let params: Vec<(&str, String)> = self.params.iter().map(|(k, v)| (*k, v.clone())).collect();
        CacheKey::new(self.exchange, self.endpoint, &params)
    }

    fn error(&self, kind: ExchangeErrorKind) -> ExchangeError {
        let err = ExchangeError::new(self.exchange, kind);
        match self.symbol {
            Some(symbol) => err.with_symbol(symbol),
            None => err,
        }
    }
}

/// Exchange-specific check of a decoded 2xx body
pub type ResponseValidator = fn(&Value) -> Result<(), ExchangeErrorKind>;

/// Shared HTTP machinery: one connection pool, one response cache
#[derive(Debug)]
pub struct RequestExecutor {
    client: Client,
    cache: Arc<ResponseCache>,
    retry_attempts: u32,
    retry_delay: Duration,
    ping_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(config: &HttpConfig, clock: Arc<dyn Clock>) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(
            client,
            Arc::new(ResponseCache::new(config.cache_ttl(), clock)),
            config.retry_attempts,
            config.retry_delay(),
        )
        .with_ping_timeout(config.request_timeout().min(HEALTH_PING_TIMEOUT)))
    }

    pub fn with_client(
        client: Client,
        cache: Arc<ResponseCache>,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            retry_attempts: retry_attempts.max(1),
            retry_delay,
            ping_timeout: HEALTH_PING_TIMEOUT,
        }
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Timestamp source for fetched readings
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.cache.now()
    }

    /// GET and decode a JSON body.
    ///
    /// Cache hits skip the network. Transient failures are retried up to the
    /// configured attempts with a fixed delay; permanent ones surface at once.
    pub async fn get_json(
        &self,
        request: &ExchangeRequest<'_>,
        validate: ResponseValidator,
    ) -> ExchangeResult<Value> {
        let key = request.cache_key();
        if let Some(body) = self.cache.get(&key) {
            debug!(exchange = %request.exchange, endpoint = request.endpoint, "response cache hit");
            return Ok(body);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.send_once(request, validate).await {
                Ok(body) => {
                    self.cache.insert(key, body.clone());
                    return Ok(body);
                }
                Err(err) if err.is_transient() && attempt < self.retry_attempts => {
                    warn!(
                        exchange = %request.exchange,
                        endpoint = request.endpoint,
                        attempt,
                        max_attempts = self.retry_attempts,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    warn!(
                        exchange = %request.exchange,
                        endpoint = request.endpoint,
                        attempt,
                        error = %err,
                        "request failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// One uncached attempt bounded by the ping timeout. Used for health
    /// checks, which must not sit in the retry loop.
    pub async fn ping_json(
        &self,
        request: &ExchangeRequest<'_>,
        validate: ResponseValidator,
    ) -> ExchangeResult<Value> {
        match tokio::time::timeout(self.ping_timeout, self.send_once(request, validate)).await {
            Ok(result) => result,
            Err(_) => Err(request.error(ExchangeErrorKind::Timeout)),
        }
    }

    async fn send_once(
        &self,
        request: &ExchangeRequest<'_>,
        validate: ResponseValidator,
    ) -> ExchangeResult<Value> {
        let mut builder = self.client.get(request.url());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(key) = request.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| request.error(classify_transport(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request.error(classify_transport(&e)))?;

        if !status.is_success() {
            return Err(request
                .error(ExchangeErrorKind::HttpStatus(status.as_u16()))
                .with_raw(truncate(&body)));
        }

        decode_body(&body, validate).map_err(|kind| request.error(kind).with_raw(truncate(&body)))
    }
}

/// Parse a 2xx body and run the exchange's own error check
pub fn decode_body(body: &str, validate: ResponseValidator) -> Result<Value, ExchangeErrorKind> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| ExchangeErrorKind::Malformed(e.to_string()))?;
    validate(&json)?;
    Ok(json)
}

fn classify_transport(err: &reqwest::Error) -> ExchangeErrorKind {
    if err.is_timeout() {
        ExchangeErrorKind::Timeout
    } else {
        ExchangeErrorKind::Transport(err.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_RAW_BODY {
        return body.to_string();
    }
    let mut end = MAX_RAW_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
