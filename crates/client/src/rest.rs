//! Backpack REST client
//!
//! One-shot HTTPS calls over [`MonoioHttpsClient`]. Signed calls carry the
//! headers produced by [`RequestSigner`], the same primitive the streaming
//! handshake uses.

use crate::auth::{Credentials, RequestSigner};
use crate::config::BackpackConfig;
use crate::errors::{ExchangeError, Result};
use crate::http::{HttpMethod, HttpResponse, MonoioHttpsClient};
use crate::traits::{AccountData, MarketData, Query, SignedTransport, Trading};
use backpack_core::PerfTimer;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub struct BackpackRestClient {
    base_url: Url,
    https_client: MonoioHttpsClient,
    signer: Option<RequestSigner>,
    timeout: Duration,
}

impl BackpackRestClient {
    /// Credentials are decoded here when the config carries them
    pub fn new(config: &BackpackConfig) -> Result<Self> {
        let signer = if config.has_credentials() {
            let credentials = Credentials::new(config.api_key.clone(), &config.api_secret)?;
            Some(RequestSigner::with_window(credentials, config.window_ms))
        } else {
            None
        };
        Self::with_parts(config, signer)
    }

    /// Reuse an already decoded signer
    pub fn with_parts(config: &BackpackConfig, signer: Option<RequestSigner>) -> Result<Self> {
        Ok(Self {
            base_url: config.rest_url()?,
            https_client: MonoioHttpsClient::new(),
            signer,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    pub fn signer(&self) -> Option<&RequestSigner> {
        self.signer.as_ref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `path` joined to the base URL with a percent-encoded query
    pub fn build_url(&self, path: &str, query: &Query) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        let query_string = build_query_string(query);
        url.set_query((!query_string.is_empty()).then_some(query_string.as_str()));
        Ok(url)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        query: &Query,
        body: Option<&str>,
        headers: Vec<(&str, String)>,
    ) -> Result<Value> {
        let timer = PerfTimer::start(format!("rest_{}", path.trim_start_matches("/api/v1/")));
        let url = self.build_url(path, query)?;
        let body = body.filter(|_| method.carries_body());

        let response = monoio::time::timeout(self.timeout, self.https_client.request(method, &url, body, &headers))
            .await
            .map_err(|_| ExchangeError::Timeout(format!("{method} {path} after {:?}", self.timeout)))??;

        let elapsed = timer.finish();
        backpack_core::log_latency!(format!("{method} {path} -> {}", response.status), elapsed);
        check_response(&response)
    }
}

/// `k=v&k=v` with values percent-encoded, in the given order
pub fn build_query_string(query: &Query) -> String {
    query
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Map an HTTP response to JSON, surfacing exchange and HTTP errors
pub fn check_response(response: &HttpResponse) -> Result<Value> {
    let body = response.body.trim();
    let value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            // Some endpoints answer with a bare string
            Err(_) if response.is_success() => Value::String(body.to_string()),
            Err(_) => return Err(ExchangeError::HttpError(response.status, body.to_string())),
        }
    };

    if let Some(code) = value.get("code") {
        let message = value
            .get("msg")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            let code = code.as_str().map(str::to_string).unwrap_or_else(|| code.to_string());
            warn!("❌ API error {}: {}", code, message);
            return Err(ExchangeError::ApiError {
                code,
                message: message.to_string(),
            });
        }
    }

    if !response.is_success() {
        return Err(ExchangeError::HttpError(response.status, body.to_string()));
    }
    Ok(value)
}

#[async_trait(?Send)]
impl SignedTransport for BackpackRestClient {
    async fn send_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value> {
        self.execute(method, path, query, body, Vec::new()).await
    }

    async fn send_signed_request(&self, method: HttpMethod, path: &str, query: &Query, body: Option<&str>) -> Result<Value> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ExchangeError::MissingCredentials(format!("{method} {path} requires API credentials")))?;
        let headers = signer.sign_request(method, body)?.headers();
        self.execute(method, path, query, body, headers).await
    }
}

impl MarketData for BackpackRestClient {}
impl Trading for BackpackRestClient {}
impl AccountData for BackpackRestClient {}
