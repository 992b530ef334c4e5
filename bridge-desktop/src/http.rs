//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{
        HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart, PartSource, RetryPolicy,
    },
};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// `execute` makes a single attempt unless a different default policy was
/// configured with [`ReqwestHttpClient::with_policy`]. JSON and multipart
/// bodies are both supported.
pub struct ReqwestHttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with a 30 second timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vault-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self::with_client(client))
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::none(),
        }
    }

    /// Policy applied by plain `execute` calls.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// File parts are opened here and streamed, so every attempt reads the
    /// file from the start.
    async fn build_part(part: MultipartPart) -> Result<Part> {
        let body = match part.source {
            PartSource::Bytes(data) => Part::bytes(data.to_vec()),
            PartSource::File { path, length } => {
                let file = tokio::fs::File::open(&path).await?;
                Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            }
        };
        Ok(body.file_name(part.file_name))
    }

    async fn build_form(parts: Vec<MultipartPart>) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            let name = part.name.clone();
            form = form.part(name, Self::build_part(part).await?);
        }
        Ok(form)
    }

    async fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(parts) = request.multipart {
            req = req.multipart(Self::build_form(parts).await?);
        } else if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        Ok(req)
    }

    /// Storage URLs embed the access token, so the URL is stripped first.
    fn classify(error: reqwest::Error) -> BridgeError {
        let error = error.without_url();
        if error.is_timeout() {
            BridgeError::Timeout(error.to_string())
        } else if error.is_connect() {
            BridgeError::OperationFailed(format!("Connection failed: {}", error))
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }

    async fn send(&self, request: HttpRequest, policy: RetryPolicy) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, method = ?request.method, "Executing HTTP request");

            let builder = self.build_request(request.clone()).await?;
            let retryable = match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (status >= 500 || status == 429) && attempt < max_attempts {
                        warn!(status, attempt, "HTTP request failed with retryable status");
                        BridgeError::OperationFailed(format!("HTTP {} error", status))
                    } else {
                        let headers: HashMap<String, String> = response
                            .headers()
                            .iter()
                            .filter_map(|(k, v)| {
                                v.to_str().ok().map(|s| (k.to_string(), s.to_string()))
                            })
                            .collect();
                        let body = response.bytes().await.map_err(Self::classify)?;

                        return Ok(HttpResponse {
                            status,
                            headers,
                            body,
                        });
                    }
                }
                Err(e) => {
                    warn!(attempt, timeout = e.is_timeout(), "HTTP request failed");
                    Self::classify(e)
                }
            };

            if attempt >= max_attempts {
                return Err(retryable);
            }

            let delay = (policy.base_delay * 2u32.pow(attempt - 1)).min(policy.max_delay);
            debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send(request, self.policy.clone()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.send(request, policy).await
    }
}
