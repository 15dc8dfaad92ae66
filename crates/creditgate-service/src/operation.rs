//! Costed operations.
//!
//! A costed operation is the external call whose price is only known after
//! it completes. The metering service invokes it once the guard approves and
//! bills the usage it reports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use creditgate_core::{MeterError, ReportedUsage, Result, RetryPolicy};

/// Timeout for a single inference request.
const INFERENCE_TIMEOUT: Duration = Duration::from_secs(120);

/// What the costed operation is asked to do.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRequest {
    /// Feature tag the call is billed under.
    pub feature: String,
    /// Model to run.
    pub model: String,
    /// Output-unit ceiling the guard priced.
    pub max_output_units: i64,
    /// Caller payload, passed through untouched.
    pub input: serde_json::Value,
}

/// What the costed operation produced.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationOutcome {
    /// Result delivered to the caller.
    pub output: serde_json::Value,
    /// Units consumed. Missing usage cannot be billed.
    #[serde(default)]
    pub usage: Option<ReportedUsage>,
}

/// An external call whose cost is realized after it completes.
#[async_trait]
pub trait CostedOperation: Send + Sync {
    /// Run the operation.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Upstream` if no result was produced.
    async fn invoke(&self, request: &OperationRequest) -> Result<OperationOutcome>;
}

/// Inference upstream reached over HTTP.
///
/// Transport failures (nothing was produced, so nothing was spent) are
/// retried per the configured [`RetryPolicy`]. Error statuses are not.
#[derive(Debug, Clone)]
pub struct HttpInference {
    client: Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpInference {
    /// Create a client for the inference endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns `MeterError::Configuration` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, api_key: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(INFERENCE_TIMEOUT)
            .build()
            .map_err(|e| MeterError::Configuration(format!("inference client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            api_key,
            retry,
        })
    }

    async fn send_once(&self, request: &OperationRequest) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder.send().await
    }
}

#[async_trait]
impl CostedOperation for HttpInference {
    async fn invoke(&self, request: &OperationRequest) -> Result<OperationOutcome> {
        let mut attempt = 0;

        let response = loop {
            match self.send_once(request).await {
                Ok(response) => break response,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    attempt += 1;
                    if !self.retry.allows(attempt) {
                        tracing::warn!(
                            feature = %request.feature,
                            attempt = %attempt,
                            error = %e,
                            "Inference request failed after max retries"
                        );
                        return Err(MeterError::Upstream(e.to_string()));
                    }

                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        feature = %request.feature,
                        attempt = %attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Inference request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(MeterError::Upstream(e.to_string())),
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeterError::Upstream(format!("inference returned {status}: {body}")));
        }

        response
            .json::<OperationOutcome>()
            .await
            .map_err(|e| MeterError::Upstream(format!("invalid inference response: {e}")))
    }
}

/// Stand-in used when no inference upstream is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredOperation;

#[async_trait]
impl CostedOperation for UnconfiguredOperation {
    async fn invoke(&self, _request: &OperationRequest) -> Result<OperationOutcome> {
        Err(MeterError::Upstream(
            "no inference upstream configured".to_string(),
        ))
    }
}
