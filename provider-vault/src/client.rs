//! Authenticated client for the feed and storage services.

use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, MultipartPart};
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::config::{EngineConfig, ServiceEndpoint};
use core_runtime::logging::redact_url_token;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::error::{ApiError, Result};
use crate::types::{ApiEnvelope, Service, StorageOp, UploadManifest};

/// Remote API client
///
/// Every call is an authenticated `POST {base}{path}?v=<millis>`. A response
/// counts as successful only when it is 2xx and its JSON body carries
/// `success: true`.
///
/// # Example
///
/// ```ignore
/// use provider_vault::{RemoteApiClient, Service, types::{routes, ScopeRequest}};
///
/// let client = RemoteApiClient::from_config(http_client, &config);
/// client.call(Service::Feed, routes::CLEAR_CACHE, &ScopeRequest::default()).await?;
/// ```
pub struct RemoteApiClient {
    http_client: Arc<dyn HttpClient>,
    feed: ServiceEndpoint,
    storage: ServiceEndpoint,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl RemoteApiClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        feed: ServiceEndpoint,
        storage: ServiceEndpoint,
    ) -> Self {
        Self {
            http_client,
            feed,
            storage,
            clock: Arc::new(SystemClock),
            timeout: None,
        }
    }

    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &EngineConfig) -> Self {
        Self::new(http_client, config.feed.clone(), config.storage.clone())
            .with_timeout(config.request_timeout)
    }

    /// Clock used for the cache-busting parameter.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn endpoint(&self, service: Service) -> &ServiceEndpoint {
        match service {
            Service::Feed => &self.feed,
            Service::Storage => &self.storage,
        }
    }

    /// Path of a token-scoped storage operation, e.g. `/<token>/hash`.
    pub fn storage_path(&self, op: StorageOp) -> String {
        format!("/{}/{}", self.storage.token, op.as_str())
    }

    fn url(&self, service: Service, path: &str) -> String {
        format!(
            "{}{}?v={}",
            self.endpoint(service).url,
            path,
            self.clock.unix_timestamp_millis()
        )
    }

    /// Path with the storage token masked, for log lines.
    pub fn loggable_path(&self, path: &str) -> String {
        redact_url_token(path, &self.storage.token)
    }

    fn request(&self, service: Service, path: &str) -> HttpRequest {
        let request =
            HttpRequest::post(self.url(service, path)).bearer_token(&self.endpoint(service).token);
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    fn check_status(&self, service: Service, path: &str, response: &HttpResponse) -> Result<()> {
        if response.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                service,
                path: self.loggable_path(path),
                status: response.status,
            })
        }
    }

    /// POST `payload` as JSON and return the decoded envelope.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Service`] when the body reports `success: false`
    /// - [`ApiError::Status`] for non-2xx responses
    /// - [`ApiError::Transport`] when no response arrived
    #[instrument(skip(self, payload), fields(service = %service, path = %self.loggable_path(path)))]
    pub async fn call<T>(&self, service: Service, path: &str, payload: &T) -> Result<ApiEnvelope>
    where
        T: Serialize + ?Sized + Sync,
    {
        let request = self
            .request(service, path)
            .json(payload)
            .map_err(|e| ApiError::Encode(e.to_string()))?;

        let response = self.http_client.execute(request).await?;
        self.check_status(service, path, &response)?;

        let envelope: ApiEnvelope = response.json().map_err(|e| ApiError::Decode {
            service,
            path: self.loggable_path(path),
            message: e.to_string(),
        })?;

        if !envelope.success {
            return Err(ApiError::Service {
                service,
                path: self.loggable_path(path),
                message: envelope
                    .message
                    .clone()
                    .unwrap_or_else(|| "request rejected".to_string()),
            });
        }

        debug!("Remote call succeeded");
        Ok(envelope)
    }

    /// Like [`call`](Self::call), but failures are logged and turned into
    /// `None` so a remote problem never aborts the caller.
    pub async fn call_or_skip<T>(
        &self,
        service: Service,
        path: &str,
        payload: &T,
    ) -> Option<ApiEnvelope>
    where
        T: Serialize + ?Sized + Sync,
    {
        match self.call(service, path, payload).await {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                log_failure(&err, service, &self.loggable_path(path));
                None
            }
        }
    }

    /// Multipart upload to the storage service.
    ///
    /// `headers` carry the optional `expire` and `context` tags. A body that is
    /// not JSON is accepted as an upload without a manifest.
    #[instrument(skip(self, parts, headers), fields(files = parts.len()))]
    pub async fn upload(
        &self,
        parts: Vec<MultipartPart>,
        headers: &[(&str, &str)],
    ) -> Result<UploadManifest> {
        let path = crate::types::routes::UPLOAD;
        let request = headers
            .iter()
            .fold(self.request(Service::Storage, path), |req, (k, v)| {
                req.header(*k, *v)
            })
            .multipart(parts);

        let response = self.http_client.execute(request).await?;
        self.check_status(Service::Storage, path, &response)?;

        let Ok(value) = response.json::<serde_json::Value>() else {
            return Ok(UploadManifest::default());
        };

        if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
            return Err(ApiError::Service {
                service: Service::Storage,
                path: path.to_string(),
                message: value
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("upload rejected")
                    .to_string(),
            });
        }

        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

/// Log a swallowed remote failure with its service and path.
pub fn log_failure(err: &ApiError, service: Service, path: &str) {
    match err {
        ApiError::Service { message, .. } => {
            error!(service = %service, path = %path, message = %message, "Api service error");
        }
        other => {
            error!(service = %service, path = %path, error = %other, "Api system error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{routes, FileRequest, ScopeRequest};
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::time::FixedClock;
    use bytes::Bytes;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn client(http: MockHttpClient) -> RemoteApiClient {
        RemoteApiClient::new(
            Arc::new(http),
            ServiceEndpoint::new("https://feed.example.com", "feed-token"),
            ServiceEndpoint::new("https://storage.example.com/", "storage-token"),
        )
        .with_clock(Arc::new(FixedClock::at_millis(1_700_000_000_000)))
    }

    #[tokio::test]
    async fn test_call_sends_authenticated_cache_busted_post() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| {
                req.url == "https://feed.example.com/api/catalog/clear/cache?v=1700000000000"
                    && req.header_value("Authorization") == Some("Bearer feed-token")
                    && req.body.as_deref() == Some(&b"{}"[..])
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":true}"#)));

        let envelope = client(http)
            .call(Service::Feed, routes::CLEAR_CACHE, &ScopeRequest::default())
            .await
            .unwrap();
        assert!(envelope.success);
    }

    #[tokio::test]
    async fn test_storage_path_uses_token() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| {
                req.url == "https://storage.example.com/storage-token/hash?v=1700000000000"
                    && req.header_value("Authorization") == Some("Bearer storage-token")
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":true,"hash":"abc"}"#)));

        let client = client(http);
        let path = client.storage_path(StorageOp::Hash);
        let envelope = client
            .call(
                Service::Storage,
                &path,
                &FileRequest {
                    file: "/storage/a.png".into(),
                    context: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(envelope.hash(), Some("abc"));
        assert_eq!(client.loggable_path(&path), "/[REDACTED]/hash");
    }

    #[tokio::test]
    async fn test_logical_failure_is_service_error() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":false,"message":"Bad type"}"#)));

        let err = client(http)
            .call(Service::Feed, routes::KEEP_ONE, &ScopeRequest::default())
            .await
            .unwrap_err();

        match err {
            ApiError::Service { service, message, .. } => {
                assert_eq!(service, Service::Feed);
                assert_eq!(message, "Bad type");
            }
            other => panic!("Expected service error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_status_and_transport_errors() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(502, "bad gateway")));
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Timeout("deadline".into())));

        let client = client(http);
        let first = client
            .call(Service::Feed, routes::REMOVE, &ScopeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(first, ApiError::Status { status: 502, .. }));

        let second = client
            .call(Service::Feed, routes::REMOVE, &ScopeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(second, ApiError::Transport(BridgeError::Timeout(_))));
        assert!(second.is_transport());
    }

    #[tokio::test]
    async fn test_call_or_skip_swallows_failures() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, "not json")));

        let result = client(http)
            .call_or_skip(Service::Feed, routes::EXPIRE, &ScopeRequest::default())
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_with_tags() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| {
                req.url == "https://storage.example.com/upload?v=1700000000000"
                    && req.header_value("context") == Some("ci@host")
                    && req.header_value("expire") == Some("7d")
                    && req.body.is_none()
                    && req.multipart.as_ref().map(|p| p[0].name.as_str()) == Some("/storage/a.png")
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"success":true,"files":{"/storage/a.png":"https://cdn.example.com/a.png"}}"#,
                ))
            });

        let manifest = client(http)
            .upload(
                vec![MultipartPart::new("/storage/a.png", "a.png", Bytes::from_static(b"png"))],
                &[("expire", "7d"), ("context", "ci@host")],
            )
            .await
            .unwrap();

        assert_eq!(
            manifest.files.get("/storage/a.png").map(String::as_str),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[tokio::test]
    async fn test_upload_accepts_plain_body() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(201, "OK")));

        let manifest = client(http).upload(Vec::new(), &[]).await.unwrap();
        assert!(manifest.files.is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":false,"message":"quota"}"#)));

        let err = client(http).upload(Vec::new(), &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Service { ref message, .. } if message == "quota"));
    }
}
