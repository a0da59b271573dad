//! HTTP transport for GraphQL requests
//!
//! This module handles the wire side of the crawler:
//! - Building the HTTP client with token, timeout and user agent
//! - POSTing one GraphQL document and capturing status, rate-limit headers and body
//! - Classifying the raw outcome into success or an `ApiError`

use crate::config::ApiConfig;
use crate::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A GraphQL document plus its variables
#[derive(Debug, Clone, Serialize)]
pub struct GraphqlRequest {
    pub query: String,
    pub variables: serde_json::Value,
}

impl GraphqlRequest {
    /// Builds a repository search request for one page
    pub fn search(predicate: &str, cursor: Option<&str>, page_size: u32) -> Self {
        Self {
            query: super::parser::SEARCH_QUERY.to_string(),
            variables: serde_json::json!({
                "query": predicate,
                "cursor": cursor,
                "first": page_size,
            }),
        }
    }
}

/// What came back from one HTTP exchange
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,

    /// `x-ratelimit-remaining`
    pub remaining: Option<u32>,

    /// `x-ratelimit-reset` (epoch seconds)
    pub reset: Option<i64>,

    /// `retry-after` (seconds)
    pub retry_after: Option<u64>,

    pub body: String,
}

impl RawResponse {
    /// Reset instant from the headers, if present and valid
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.reset
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

/// Failures before any HTTP status was received
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be built; retrying will not help
    #[error("Request could not be built: {0}")]
    Build(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Build(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::Transient(other.to_string()),
        }
    }
}

/// Sends one GraphQL request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &GraphqlRequest) -> Result<RawResponse, TransportError>;
}

/// Transport over reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Builds the transport from API settings
    ///
    /// # Returns
    ///
    /// * `Ok(HttpTransport)` - Client built
    /// * `Err(reqwest::Error)` - Failed to build client
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            endpoint: config.endpoint.clone(),
        })
    }
}

/// Builds an HTTP client carrying the access token on every request
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    if let Some(token) = config.resolve_token() {
        if let Ok(mut value) = HeaderValue::from_str(&format!("bearer {}", token.trim())) {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else {
            tracing::warn!("Access token contains invalid header characters; sending without it");
        }
    } else {
        tracing::warn!(
            "No access token configured (checked {}); requests will be unauthenticated",
            config.token_env
        );
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &GraphqlRequest) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let remaining = header_number::<u32>(headers, "x-ratelimit-remaining");
        let reset = header_number::<i64>(headers, "x-ratelimit-reset");
        let retry_after = header_number::<u64>(headers, "retry-after");

        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(RawResponse {
            status,
            remaining,
            reset,
            retry_after,
            body,
        })
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::Build(e.to_string())
    } else if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Classifies a non-200 response
///
/// | Condition | Outcome |
/// |-----------|---------|
/// | HTTP 401 | Unauthorized (crawl-wide) |
/// | HTTP 403 + remaining 0, retry-after, or rate-limit message | RateLimited |
/// | HTTP 403 otherwise | Unauthorized (crawl-wide) |
/// | HTTP 429 | RateLimited |
/// | HTTP 408, 5xx | Transient |
/// | Other 4xx | Query (partition only) |
pub fn classify_status(response: &RawResponse) -> ApiError {
    let summary = || format!("HTTP {}: {}", response.status, snippet(&response.body));
    let rate_limited = || ApiError::RateLimited {
        resets_at: response.resets_at(),
        retry_after: response.retry_after.map(Duration::from_secs),
    };

    match response.status {
        401 => ApiError::Unauthorized(summary()),
        403 => {
            let lowered = response.body.to_ascii_lowercase();
            if response.remaining == Some(0)
                || response.retry_after.is_some()
                || lowered.contains("rate limit")
            {
                rate_limited()
            } else {
                ApiError::Unauthorized(summary())
            }
        }
        429 => rate_limited(),
        408 | 500..=599 => ApiError::Transient(summary()),
        _ => ApiError::Query(summary()),
    }
}

fn snippet(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
            ..Default::default()
        }
    }

    fn api_config() -> ApiConfig {
        ApiConfig {
            endpoint: "http://127.0.0.1:9/graphql".to_string(),
            token: Some("ghp_test".to_string()),
            token_env: "REPO_HARVEST_UNUSED_TOKEN".to_string(),
            page_size: 100,
            timeout_secs: 5,
            user_agent: "repo-harvest-test/0.1".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&api_config()).is_ok());
    }

    #[test]
    fn test_search_request_variables() {
        let request = GraphqlRequest::search("stars:1..10", None, 50);
        assert_eq!(request.variables["query"], "stars:1..10");
        assert!(request.variables["cursor"].is_null());
        assert_eq!(request.variables["first"], 50);

        let next = GraphqlRequest::search("stars:1..10", Some("abc"), 50);
        assert_eq!(next.variables["cursor"], "abc");
    }

    #[test]
    fn test_classify_auth_failures() {
        assert!(classify_status(&response(401, "Bad credentials")).is_global());
        assert!(classify_status(&response(403, "Resource not accessible")).is_global());
    }

    #[test]
    fn test_classify_rate_limits() {
        let mut throttled = response(403, "{}");
        throttled.remaining = Some(0);
        throttled.reset = Some(1_700_000_000);
        match classify_status(&throttled) {
            ApiError::RateLimited { resets_at, .. } => {
                assert_eq!(resets_at.unwrap().timestamp(), 1_700_000_000)
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        let mut secondary = response(403, "You have exceeded a secondary rate limit");
        secondary.retry_after = Some(30);
        match classify_status(&secondary) {
            ApiError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        assert!(matches!(
            classify_status(&response(429, "")),
            ApiError::RateLimited { .. }
        ));
    }

    #[test]
    fn test_classify_transient_and_query() {
        assert!(matches!(
            classify_status(&response(502, "Bad Gateway")),
            ApiError::Transient(_)
        ));
        assert!(matches!(
            classify_status(&response(408, "")),
            ApiError::Transient(_)
        ));
        assert!(matches!(
            classify_status(&response(422, "Validation Failed")),
            ApiError::Query(_)
        ));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: ApiError = TransportError::Timeout("30s".to_string()).into();
        assert!(matches!(err, ApiError::Transient(_)));

        let err: ApiError = TransportError::Build("relative URL".to_string()).into();
        assert!(err.is_global());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let transport = HttpTransport::new(&api_config()).unwrap();
        let result = transport
            .send(&GraphqlRequest::search("stars:0", None, 1))
            .await;
        let err: ApiError = result.unwrap_err().into();
        assert!(matches!(err, ApiError::Transient(_)));
    }
}
