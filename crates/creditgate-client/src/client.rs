//! Creditgate HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use creditgate_core::{AuditEntry, Balance, CreditTarget, Plan, SubscriberId};

use crate::error::ClientError;
use crate::types::{
    AdjustRequest, ApiErrorResponse, GuardCheckRequest, GuardCheckResponse, MeteredRequest,
    MeteredResponse, OpenAccountRequest, ResetMonthlyRequest,
};

/// Creditgate API client.
///
/// Speaks for one actor. Every request carries the shared service key; calls
/// that act on a ledger also name the subscriber.
#[derive(Debug, Clone)]
pub struct CreditGateClient {
    client: Client,
    base_url: String,
    api_key: String,
    actor: Option<String>,
    admin: bool,
}

impl CreditGateClient {
    /// Create a new creditgate client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the creditgate service (e.g., `"http://creditgate:8080"`)
    /// * `api_key` - Shared service key
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new creditgate client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        // No overall timeout: it would also cut the long-lived change stream.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            actor: options.actor,
            admin: options.admin,
        })
    }

    /// Open a ledger for `subscriber_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the account already exists.
    pub async fn open_account(
        &self,
        subscriber_id: &SubscriberId,
        plan: Plan,
    ) -> Result<Balance, ClientError> {
        let request = self
            .post(subscriber_id, "/v1/accounts")
            .json(&OpenAccountRequest { plan });
        self.send(request).await
    }

    /// Get the authoritative balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError> {
        let request = self.get(subscriber_id, "/v1/balance");
        self.send(request).await
    }

    /// Run the authoritative guard for `feature`.
    ///
    /// A rejection is a successful response with a `Rejected` decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the guard could not evaluate.
    pub async fn check_guard(
        &self,
        subscriber_id: &SubscriberId,
        feature: impl Into<String>,
        max_output_units: Option<i64>,
    ) -> Result<GuardCheckResponse, ClientError> {
        let request = self
            .post(subscriber_id, "/v1/guard/check")
            .json(&GuardCheckRequest {
                feature: feature.into(),
                max_output_units,
            });
        self.send(request).await
    }

    /// Perform a metered operation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rejected` if the guard refused the call, or
    /// another error if the request or the operation failed.
    pub async fn perform_metered(
        &self,
        subscriber_id: &SubscriberId,
        request: &MeteredRequest,
    ) -> Result<MeteredResponse, ClientError> {
        let request = self.post(subscriber_id, "/v1/metered").json(request);
        self.send(request).await
    }

    /// Credit a subscriber. Requires an admin client.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the caller is not an admin.
    pub async fn adjust_balance(
        &self,
        subscriber_id: &SubscriberId,
        target: CreditTarget,
        amount: i64,
        reason: impl Into<String>,
    ) -> Result<Balance, ClientError> {
        let request = self
            .post(subscriber_id, "/v1/admin/adjust")
            .json(&AdjustRequest {
                subscriber_id: *subscriber_id,
                target,
                amount,
                reason: reason.into(),
            });
        self.send(request).await
    }

    /// Reset a subscriber's monthly allowance. Requires an admin client.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the caller is not an admin.
    pub async fn reset_monthly(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError> {
        let request = self
            .post(subscriber_id, "/v1/admin/reset-monthly")
            .json(&ResetMonthlyRequest {
                subscriber_id: *subscriber_id,
            });
        self.send(request).await
    }

    /// List a subscriber's audit trail, newest first. Requires an admin client.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the caller is not an admin.
    pub async fn list_audit(
        &self,
        subscriber_id: &SubscriberId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>, ClientError> {
        let path = format!("/v1/admin/audit/{subscriber_id}");
        let request = self
            .get(subscriber_id, &path)
            .query(&[("limit", limit), ("offset", offset)]);
        self.send(request).await
    }

    /// Open the server-sent event stream of balance changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    pub async fn open_balance_stream(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self
            .get(subscriber_id, "/v1/balance/stream")
            .header("accept", "text/event-stream")
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    fn get(&self, subscriber_id: &SubscriberId, path: &str) -> RequestBuilder {
        self.identify(self.client.get(format!("{}{path}", self.base_url)), subscriber_id)
    }

    fn post(&self, subscriber_id: &SubscriberId, path: &str) -> RequestBuilder {
        self.identify(self.client.post(format!("{}{path}", self.base_url)), subscriber_id)
    }

    fn identify(&self, builder: RequestBuilder, subscriber_id: &SubscriberId) -> RequestBuilder {
        let mut builder = builder
            .header("x-api-key", &self.api_key)
            .header("x-subscriber-id", subscriber_id.to_string());
        if let Some(actor) = &self.actor {
            builder = builder.header("x-actor", actor);
        }
        if self.admin {
            builder = builder.header("x-actor-role", "admin");
        }
        builder
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(error_from_response(response).await)
    }
}

/// Convert an error response into a typed error.
async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let error_body: Result<ApiErrorResponse, _> = response.json().await;

    let Ok(api_error) = error_body else {
        return ClientError::Api {
            code: "unknown".to_string(),
            message: format!("HTTP {status}"),
            status: status.as_u16(),
        };
    };

    let detail = api_error.error;
    let class = detail.class.as_deref();
    match detail.code.as_str() {
        "rate_limited" => ClientError::RateLimited {
            retry_after_ms: detail
                .details
                .as_ref()
                .and_then(|d| d.get("retry_after_ms"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0),
        },
        "store_unavailable" => ClientError::StoreUnavailable(detail.message),
        "account_not_found" => ClientError::AccountNotFound,
        code if matches!(class, Some("remedy" | "policy")) => ClientError::Rejected {
            code: code.to_string(),
            message: detail.message,
            remedy: class == Some("remedy"),
        },
        code => ClientError::Api {
            code: code.to_string(),
            message: detail.message,
            status: status.as_u16(),
        },
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Connect timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Actor name recorded in audit entries.
    pub actor: Option<String>,
    /// Act as an administrator.
    pub admin: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            actor: None,
            admin: false,
        }
    }
}

impl ClientOptions {
    /// Options for an administrator named `name`.
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            actor: Some(name.into()),
            admin: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn balance_json(id: &SubscriberId, purchased: i64) -> serde_json::Value {
        json!({
            "subscriber_id": id.to_string(),
            "plan": "standard",
            "monthly_allowance": 2500,
            "purchased_balance": purchased,
            "lifetime_used": 0,
            "lifetime_shortfall": 0,
            "updated_at": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = CreditGateClient::new("http://localhost:8080/", "key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn admin_options() {
        let client =
            CreditGateClient::with_options("http://localhost", "key", ClientOptions::admin("ops"))
                .unwrap();
        assert!(client.admin);
        assert_eq!(client.actor.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn get_balance_sends_identity_headers() {
        let server = MockServer::start().await;
        let id = SubscriberId::generate();
        Mock::given(method("GET"))
            .and(path("/v1/balance"))
            .and(header("x-api-key", "key"))
            .and(header("x-subscriber-id", id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(balance_json(&id, 4200)))
            .expect(1)
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let balance = client.get_balance(&id).await.unwrap();

        assert_eq!(balance.purchased_balance, 4200);
        assert_eq!(balance.plan, Plan::Standard);
    }

    #[tokio::test]
    async fn remedy_rejection_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/metered"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {
                    "code": "low_balance_block",
                    "message": "rejected: balance below security buffer",
                    "class": "remedy"
                }
            })))
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let err = client
            .perform_metered(&SubscriberId::generate(), &MeteredRequest::new("chat", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Rejected { ref code, remedy: true, .. } if code == "low_balance_block"
        ));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "code": "rate_limited",
                    "message": "rate limited",
                    "class": "transient",
                    "details": { "retry_after_ms": 1500 }
                }
            })))
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let err = client
            .check_guard(&SubscriberId::generate(), "chat", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RateLimited { retry_after_ms: 1500 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn admin_client_sends_role_and_paginates_audit() {
        let server = MockServer::start().await;
        let id = SubscriberId::generate();
        Mock::given(method("GET"))
            .and(path(format!("/v1/admin/audit/{id}")))
            .and(header("x-actor-role", "admin"))
            .and(header("x-actor", "ops"))
            .and(query_param("limit", "10"))
            .and(query_param("offset", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            CreditGateClient::with_options(server.uri(), "key", ClientOptions::admin("ops"))
                .unwrap();
        let entries = client.list_audit(&id, 10, 20).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn unparsable_error_body_is_generic_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = CreditGateClient::new(server.uri(), "key").unwrap();
        let err = client.get_balance(&SubscriberId::generate()).await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
    }
}
