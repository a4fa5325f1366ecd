//! reqwest-backed `HttpClient`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// `HttpClient` over a pooled reqwest client.
///
/// Connection errors, 5xx and 429 are retried with backoff; every other
/// status (401, 404, 405, ...) is handed back to the caller. Understands the
/// WebDAV verbs `MKCOL`, `MOVE` and `PROPFIND`.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Client whose requests time out after `timeout` unless the request
    /// sets its own.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("cloudsync-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> Result<reqwest::Method> {
        Ok(match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Mkcol | HttpMethod::Move | HttpMethod::Propfind => {
                reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| {
                    BridgeError::OperationFailed(format!("Invalid method {}: {}", method.as_str(), e))
                })?
            }
        })
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method)?;
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        Ok(req)
    }

    /// One attempt. `Err` carries the failure when the attempt may be retried.
    async fn send_once(&self, request: HttpRequest) -> Result<std::result::Result<HttpResponse, BridgeError>> {
        let response = match self.build_request(request)?.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(Err(BridgeError::Transport("Request timed out".to_string())))
            }
            Err(e) if e.is_connect() => {
                return Ok(Err(BridgeError::Transport(format!("Connection failed: {}", e))))
            }
            Err(e) => return Ok(Err(BridgeError::Transport(e.to_string()))),
        };

        let status = response.status().as_u16();
        if status >= 500 || status == 429 {
            return Ok(Err(BridgeError::Transport(format!("HTTP {} error", status))));
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        Ok(Ok(HttpResponse {
            status,
            headers,
            body,
        }))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, RetryPolicy::default()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(attempt, method = request.method.as_str(), url = %request.url, "HTTP request");

            match self.send_once(request.clone()).await? {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(error = %err, attempt, "HTTP request failed");
                    last_error = Some(err);
                }
            }

            if attempt < attempts {
                sleep(policy.delay_for(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::Transport("All retry attempts exhausted".to_string())
        }))
    }
}
