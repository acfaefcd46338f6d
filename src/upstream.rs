// src/upstream.rs
use crate::error::ApiError;
use crate::keys::ApiKeyManager;
use log::{error, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Api-Key";
const MAX_ERROR_BODY: usize = 200;

/// Thin client for the upstream Indian stock-market API.
pub struct StockApiClient {
    http: Client,
    base_url: String,
    keys: ApiKeyManager,
}

impl StockApiClient {
    pub fn new(base_url: &str, keys: ApiKeyManager, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(StockApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    /// `GET {base}{endpoint}?params`. A 401, 403 or 429 moves to the next key
    /// and retries; each key is tried at most once per call.
    pub async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_rejection = None;

        for _ in 0..self.keys.len() {
            let (slot, key) = self.keys.current();
            info!("Fetching {} from upstream.", endpoint);

            let response = self
                .http
                .get(&url)
                .query(params)
                .header(API_KEY_HEADER, key)
                .send()
                .await
                .map_err(|e| {
                    error!("HTTP request to {} failed: {}", endpoint, e);
                    let status = if e.is_timeout() {
                        StatusCode::GATEWAY_TIMEOUT
                    } else {
                        StatusCode::BAD_GATEWAY
                    };
                    ApiError::Upstream {
                        status: status.as_u16(),
                        message: e.to_string(),
                    }
                })?;

            let status = response.status();
            if matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            ) {
                warn!(
                    "Upstream rejected key #{} with HTTP {}, rotating.",
                    self.keys.position(slot),
                    status
                );
                self.keys.rotate_from(slot);
                last_rejection = Some(ApiError::Upstream {
                    status: status.as_u16(),
                    message: "all API keys were rejected or rate limited".to_string(),
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!(
                    "Failed to fetch {} from upstream: HTTP {}",
                    endpoint, status
                );
                return Err(ApiError::Upstream {
                    status: status.as_u16(),
                    message: truncate(&body, MAX_ERROR_BODY),
                });
            }

            return response.json::<Value>().await.map_err(|e| {
                error!("Failed to parse upstream response for {}: {}", endpoint, e);
                ApiError::Upstream {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    message: format!("invalid JSON from upstream: {}", e),
                }
            });
        }

        Err(last_rejection.unwrap_or_else(|| {
            ApiError::Internal("no upstream API keys configured".to_string())
        }))
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
