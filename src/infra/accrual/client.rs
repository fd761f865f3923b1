//! HTTP client for the external accrual service.
//!
//! `GET {base}/api/orders/{number}` answers with
//! `{"order": "...", "status": "...", "accrual": 500}` once the order is
//! registered, `204` while it is unknown, and `429` with a `Retry-After`
//! header when called too often.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

use crate::domain::{
    AccrualError, AccrualOutcome, AccrualProvider, AccrualStatus, AppError, ConfigError, env_or,
};

/// Default accrual service address
pub const DEFAULT_ACCRUAL_URL: &str = "http://127.0.0.1:8081";

/// Accrual client configuration
#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Pause reported when a 429 has no parseable `Retry-After`
    pub default_retry_after: Duration,
}

impl Default for AccrualClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ACCRUAL_URL.to_string(),
            request_timeout: Duration::from_secs(5),
            default_retry_after: Duration::from_secs(60),
        }
    }
}

impl AccrualClientConfig {
    /// Load from `ACCRUAL_SYSTEM_ADDRESS` and `ACCRUAL_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let base_url = env_or("ACCRUAL_SYSTEM_ADDRESS", defaults.base_url.clone())?;
        let request_timeout = Duration::from_secs(env_or(
            "ACCRUAL_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?);
        Ok(Self {
            base_url,
            request_timeout,
            ..defaults
        })
    }
}

/// Add a scheme when missing and strip trailing slashes
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Body of a successful lookup
#[derive(Debug, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

/// Accrual provider backed by the HTTP accrual service
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    http_client: Client,
    base_url: String,
    default_retry_after: Duration,
}

impl HttpAccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Accrual(AccrualError::Network(e.to_string())))?;

        Ok(Self {
            http_client,
            base_url: normalize_base_url(&config.base_url),
            default_retry_after: config.default_retry_after,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn retry_after(&self, response: &reqwest::Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

#[async_trait]
impl AccrualProvider for HttpAccrualClient {
    #[instrument(skip(self))]
    async fn lookup(&self, number: &str) -> Result<AccrualOutcome, AppError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        debug!(url = %url, "Querying accrual service");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(error = %e, "Accrual request timed out");
                AppError::Accrual(AccrualError::Timeout(e.to_string()))
            } else {
                error!(error = %e, "Accrual request failed");
                AppError::Accrual(AccrualError::Network(e.to_string()))
            }
        })?;

        match response.status() {
            StatusCode::OK => {
                let body: AccrualResponse = response.json().await.map_err(|e| {
                    error!(error = %e, "Failed to parse accrual response");
                    AppError::Accrual(AccrualError::Parse(e.to_string()))
                })?;
                if body.order != number {
                    warn!(reported = %body.order, "Accrual response names a different order");
                }
                Ok(AccrualOutcome::Reported {
                    status: body.status,
                    accrual: body.accrual,
                })
            }
            StatusCode::NO_CONTENT => Ok(AccrualOutcome::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = self.retry_after(&response);
                warn!(retry_after = ?retry_after, "Accrual service rate limit");
                Ok(AccrualOutcome::RateLimited { retry_after })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Accrual service returned error");
                Err(AppError::Accrual(AccrualError::UnexpectedStatus {
                    status_code: status.as_u16(),
                    message: body,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("localhost:8081"), "http://localhost:8081");
        assert_eq!(
            normalize_base_url("http://accrual:8080/"),
            "http://accrual:8080"
        );
        assert_eq!(
            normalize_base_url(" https://accrual.example.com "),
            "https://accrual.example.com"
        );
    }

    #[test]
    fn test_response_parses_with_and_without_accrual() {
        let processed: AccrualResponse =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":500}"#)
                .unwrap();
        assert_eq!(processed.status, AccrualStatus::Processed);
        assert_eq!(processed.accrual, Some(Decimal::from(500)));

        let registered: AccrualResponse =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        assert_eq!(registered.status, AccrualStatus::Registered);
        assert_eq!(registered.accrual, None);
    }

    #[test]
    fn test_client_uses_normalized_url() {
        let client = HttpAccrualClient::new(AccrualClientConfig {
            base_url: "accrual:8081/".to_string(),
            ..AccrualClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://accrual:8081");
    }
}
