//! JSON-over-HTTP adapter producing queue operations.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde_json::Value;

use crate::error::{FetchError, FetchResult};
use crate::queue::{Operation, operation};

/// Default market data API base URL
pub const DEFAULT_API_HOST: &str = "https://api.stockdash.app";

/// Supplies bearer tokens for authenticated APIs
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token to attach to the next request, if any
    async fn token(&self) -> FetchResult<Option<String>>;

    /// Obtain a fresh token after the server rejected the current one.
    /// `Ok(None)` means no refresh is possible.
    async fn refresh(&self) -> FetchResult<Option<String>>;
}

/// A fixed token that cannot be refreshed
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> FetchResult<Option<String>> {
        Ok(Some(self.0.clone()))
    }

    async fn refresh(&self) -> FetchResult<Option<String>> {
        Ok(None)
    }
}

pub struct HttpFetcher {
    http: HttpClient,
    base_url: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl HttpFetcher {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> FetchResult<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let quota =
            Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(quota),
            tokens: None,
        })
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(provider);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` and decode the body as JSON.
    ///
    /// A 401 triggers one token refresh and a single retry.
    pub async fn get_json(&self, path: &str) -> FetchResult<Value> {
        let token = match &self.tokens {
            Some(provider) => provider.token().await?,
            None => None,
        };

        let response = self.send(path, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::decode(path, response).await;
        }

        let refreshed = match &self.tokens {
            Some(provider) => provider.refresh().await?,
            None => None,
        };
        let Some(token) = refreshed else {
            return Err(FetchError::Unauthorized);
        };

        debug!("Token refreshed, retrying {}", path);
        let retry = self.send(path, Some(&token)).await?;
        Self::decode(path, retry).await
    }

    /// An operation that performs `get_json(path)` each time it is invoked
    pub fn get_operation(self: &Arc<Self>, path: &str) -> Operation<Value> {
        let fetcher = Arc::clone(self);
        let path = path.to_string();
        operation(move || {
            let fetcher = Arc::clone(&fetcher);
            let path = path.clone();
            async move { fetcher.get_json(&path).await }
        })
    }

    async fn send(&self, path: &str, token: Option<&str>) -> FetchResult<Response> {
        self.rate_limiter.until_ready().await;

        let mut request = self.http.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        debug!("GET {}", path);
        Ok(request.send().await?)
    }

    async fn decode(path: &str, response: Response) -> FetchResult<Value> {
        let status = response.status();
        match status {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| FetchError::InvalidResponse(format!("Failed to parse response: {}", e))),
            StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
            StatusCode::FORBIDDEN => Err(FetchError::Forbidden),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(path.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(FetchError::RateLimited(retry_after))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Bad request".to_string());
                Err(FetchError::BadRequest(body))
            }
            status if status.is_server_error() => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("Server error: {}", status));
                Err(FetchError::Server(body))
            }
            _ => Err(FetchError::InvalidResponse(format!(
                "Unexpected status code: {}",
                status
            ))),
        }
    }
}
