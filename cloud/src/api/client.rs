use converge::Context;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::common::{ApiErrorResponse, ApiQueryParams, ApiResponse};
use super::error::ApiError;
use crate::config::ProviderConfig;

pub const REGION_HEADER: &str = "X-Region";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Cloud control plane API client
///
/// Every call issues exactly one HTTP request. Retrying is the caller's job,
/// through the engine's retry executor and the [`converge::Classify`] impl on
/// [`ApiError`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: String,
    auth_header: String,
    region: Option<String>,
    request_timeout: Duration,
}

impl Client {
    pub fn new(config: &ProviderConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()?;

        let base_url = config.endpoint.trim_end_matches('/').to_string();
        let auth_header = format!(
            "CLOUD-HMAC secret_id={}, secret_key={}",
            config.secret_id, config.secret_key
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                auth_header,
                region: config.region.clone(),
                request_timeout: config.request_timeout,
            }),
        })
    }

    /// Instance API operations
    pub fn instances(&self) -> super::instances::InstancesApi<'_> {
        super::instances::InstancesApi::new(self)
    }

    /// Packet filter API operations
    pub fn packet_filters(&self) -> super::packet_filters::PacketFiltersApi<'_> {
        super::packet_filters::PacketFiltersApi::new(self)
    }

    /// Security policy rule API operations
    pub fn security_rules(&self) -> super::security_rules::SecurityRulesApi<'_> {
        super::security_rules::SecurityRulesApi::new(self)
    }

    /// Execute a GET request
    pub async fn get<T: DeserializeOwned>(&self, ctx: &Context, path: &str) -> Result<T, ApiError> {
        self.execute(ctx, self.request(ctx, Method::GET, path), path)
            .await
    }

    /// Execute a GET request with query parameters
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        params: &ApiQueryParams,
    ) -> Result<T, ApiError> {
        let full_path = format!("{}{}", path, params.to_query_string());
        self.get(ctx, &full_path).await
    }

    /// Execute a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(ctx, Method::POST, path).json(body);
        self.execute(ctx, request, path).await
    }

    /// Execute a PUT request
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(ctx, Method::PUT, path).json(body);
        self.execute(ctx, request, path).await
    }

    /// Execute a DELETE request
    pub async fn delete<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
    ) -> Result<T, ApiError> {
        self.execute(ctx, self.request(ctx, Method::DELETE, path), path)
            .await
    }

    fn request(&self, ctx: &Context, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.inner.base_url, path);
        tracing::debug!(log_id = ctx.log_id(), "{} request to: {}", method, url);

        let mut builder = self
            .inner
            .http_client
            .request(method, &url)
            .header(AUTHORIZATION, &self.inner.auth_header)
            .header(REQUEST_ID_HEADER, ctx.log_id());
        if let Some(region) = &self.inner.region {
            builder = builder.header(REGION_HEADER, region);
        }
        builder
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, ApiError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::debug!(log_id = ctx.log_id(), "Request to {} timed out", path);
                return Err(ApiError::Timeout(self.inner.request_timeout.as_secs()));
            }
            Err(e) => return Err(ApiError::Request(e)),
        };

        if response.status().is_success() {
            self.parse_success_response(ctx, response).await
        } else {
            Err(self.handle_error_response(ctx, response, path).await)
        }
    }

    /// Parse successful response
    async fn parse_success_response<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let mut text = response.text().await?;
        tracing::debug!(log_id = ctx.log_id(), "API response body: {}", text);
        if text.trim().is_empty() {
            text = "{}".to_string();
        }

        match serde_json::from_str::<ApiResponse<T>>(&text) {
            Ok(wrapper) => Ok(wrapper.data),
            Err(_) => match serde_json::from_str::<T>(&text) {
                Ok(data) => Ok(data),
                Err(e) => {
                    tracing::error!(
                        log_id = ctx.log_id(),
                        "Failed to deserialize response: {}, body: {}",
                        e,
                        text
                    );
                    Err(ApiError::Parse(format!("Failed to parse response: {}", e)))
                }
            },
        }
    }

    /// Map an error response onto [`ApiError`]
    async fn handle_error_response(
        &self,
        ctx: &Context,
        response: reqwest::Response,
        path: &str,
    ) -> ApiError {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let (code, message) = match serde_json::from_str::<ApiErrorResponse>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => (String::new(), text),
        };

        tracing::debug!(
            log_id = ctx.log_id(),
            "API error from {} (HTTP {}) {}: {}",
            path,
            status.as_u16(),
            code,
            message
        );

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::NOT_FOUND => ApiError::NotFound { code, message },
            StatusCode::TOO_MANY_REQUESTS if code.is_empty() => ApiError::RateLimited,
            s if s.is_server_error() && code.is_empty() => ApiError::ServiceUnavailable,
            s => ApiError::Api {
                status: s.as_u16(),
                code,
                message,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::api::common::Ack;
    use converge::{Classify, ErrorClass};
    use mockito::Server;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        id: String,
    }

    fn client_for(url: String) -> Client {
        Client::new(&ProviderConfig::new(url, "AKID", "secret").with_region("eu-west-1")).unwrap()
    }

    #[tokio::test]
    async fn client_sends_credentials_and_region() {
        let mut server = Server::new_async().await;
        let ctx = Context::new();
        let mock = server
            .mock("GET", "/v1/things/thing-1")
            .match_header("authorization", "CLOUD-HMAC secret_id=AKID, secret_key=secret")
            .match_header("x-region", "eu-west-1")
            .match_header("x-request-id", ctx.log_id())
            .with_body(r#"{"data":{"id":"thing-1"}}"#)
            .create_async()
            .await;

        let thing: Thing = client_for(server.url())
            .get(&ctx, "/v1/things/thing-1")
            .await
            .unwrap();

        assert_eq!(thing.id, "thing-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_strips_trailing_slash_from_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/v1/things/thing-1")
            .with_body(r#"{"data":null}"#)
            .create_async()
            .await;

        let _: Ack = client_for(format!("{}/", server.url()))
            .delete(&Context::new(), "/v1/things/thing-1")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_accepts_empty_success_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", "/v1/things/thing-1")
            .with_status(204)
            .create_async()
            .await;

        let ack: Result<Ack, _> = client_for(server.url())
            .put(&Context::new(), "/v1/things/thing-1", &serde_json::json!({"id": "x"}))
            .await;

        assert!(ack.is_ok());
    }

    #[tokio::test]
    async fn client_issues_exactly_one_request_on_server_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/things")
            .with_status(503)
            .with_body("upstream unavailable")
            .expect(1)
            .create_async()
            .await;

        let err = client_for(server.url())
            .get::<Thing>(&Context::new(), "/v1/things")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ServiceUnavailable));
        assert_eq!(err.class(), ErrorClass::Retryable);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_maps_error_envelopes() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/v1/things/thing-404")
            .with_status(404)
            .with_body(r#"{"error":{"code":"ResourceNotFound","message":"no such thing"}}"#)
            .create_async()
            .await;
        let _busy = server
            .mock("GET", "/v1/things/thing-busy")
            .with_status(400)
            .with_body(r#"{"error":{"code":"ResourceInUse","message":"locked"}}"#)
            .create_async()
            .await;
        let _bad = server
            .mock("GET", "/v1/things/thing-bad")
            .with_status(400)
            .with_body(r#"{"error":{"code":"InvalidParameterValue","message":"bad"}}"#)
            .create_async()
            .await;
        let _denied = server
            .mock("GET", "/v1/things/thing-401")
            .with_status(401)
            .create_async()
            .await;
        let _throttled = server
            .mock("GET", "/v1/things/thing-429")
            .with_status(429)
            .create_async()
            .await;

        let client = client_for(server.url());
        let ctx = Context::new();
        let class_of = |path: &'static str| {
            let client = client.clone();
            let ctx = ctx.clone();
            async move { client.get::<Thing>(&ctx, path).await.unwrap_err() }
        };

        let missing = class_of("/v1/things/thing-404").await;
        assert!(matches!(missing, ApiError::NotFound { ref code, .. } if code == "ResourceNotFound"));
        assert_eq!(missing.class(), ErrorClass::NotFound);

        let busy = class_of("/v1/things/thing-busy").await;
        assert_eq!(busy.code(), Some("ResourceInUse"));
        assert_eq!(busy.class(), ErrorClass::Retryable);

        let bad = class_of("/v1/things/thing-bad").await;
        assert_eq!(bad.class(), ErrorClass::Fatal);

        assert!(matches!(
            class_of("/v1/things/thing-401").await,
            ApiError::Unauthorized
        ));
        assert!(matches!(
            class_of("/v1/things/thing-429").await,
            ApiError::RateLimited
        ));
    }

    #[tokio::test]
    async fn client_reports_unparseable_bodies() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/things/thing-1")
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = client_for(server.url())
            .get::<Thing>(&Context::new(), "/v1/things/thing-1")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Parse(_)));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[tokio::test]
    async fn client_handles_network_errors() {
        let client = client_for("http://127.0.0.1:1".to_string());

        let err = client
            .get::<Thing>(&Context::new(), "/v1/things")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Request(_)));
        assert_eq!(err.class(), ErrorClass::Retryable);
    }
}
