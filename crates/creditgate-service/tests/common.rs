//! Common test utilities for creditgate integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};

use creditgate_core::{CreditTarget, MeterError, Plan, ReportedUsage, SubscriberId};
use creditgate_service::{
    create_router, AppState, CostedOperation, OperationOutcome, OperationRequest, ServiceConfig,
};
use creditgate_store::{LedgerStore, MemoryStore};

/// Shared key the test gateway presents.
pub const SERVICE_API_KEY: &str = "test-service-key";

/// A costed operation that echoes its input and reports fixed usage.
pub struct ScriptedOperation {
    /// Usage reported per call. `None` simulates an upstream that omits it.
    pub usage: Option<ReportedUsage>,
    /// Fail every call as an upstream error.
    pub fail: bool,
    /// Number of invocations.
    pub calls: AtomicUsize,
}

impl ScriptedOperation {
    /// Report `output_units` billable units per call.
    pub fn reporting(output_units: i64) -> Self {
        Self {
            usage: Some(ReportedUsage {
                input_units: 100,
                output_units,
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CostedOperation for ScriptedOperation {
    async fn invoke(&self, request: &OperationRequest) -> creditgate_core::Result<OperationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MeterError::Upstream("scripted failure".into()));
        }
        Ok(OperationOutcome {
            output: serde_json::json!({ "echo": request.input, "model": request.model }),
            usage: self.usage,
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct ledger access for setup and assertions.
    pub store: Arc<MemoryStore>,
    /// The costed operation behind `/v1/metered`.
    pub operation: Arc<ScriptedOperation>,
    /// A test subscriber for authenticated requests.
    pub subscriber_id: SubscriberId,
}

impl TestHarness {
    /// Create a new test harness with a fresh ledger and default settings.
    pub fn new() -> Self {
        Self::with_config(test_config(), ScriptedOperation::reporting(1000))
    }

    /// Create a harness with custom settings.
    pub fn with_config(config: ServiceConfig, operation: ScriptedOperation) -> Self {
        let store = Arc::new(MemoryStore::new());
        let operation = Arc::new(operation);

        let state = AppState::with_operation(store.clone(), config, operation.clone());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            operation,
            subscriber_id: SubscriberId::generate(),
        }
    }

    /// Open the test subscriber's ledger and fund its purchased balance.
    pub async fn open_funded(&self, plan: Plan, purchased: i64) {
        self.store
            .open_account(self.subscriber_id, plan)
            .await
            .expect("Failed to open account");
        if purchased > 0 {
            self.store
                .credit(
                    &self.subscriber_id,
                    purchased,
                    CreditTarget::PurchasedBalance,
                    "test funding",
                    "harness",
                )
                .await
                .expect("Failed to fund account");
        }
    }

    /// Current purchased balance of the test subscriber.
    pub async fn purchased_balance(&self) -> i64 {
        self.store
            .get_balance(&self.subscriber_id)
            .await
            .expect("Failed to load balance")
            .purchased_balance
    }

    /// Sign a request as the test subscriber.
    pub fn as_subscriber(&self, request: TestRequest) -> TestRequest {
        with_header(
            with_header(request, "x-api-key", SERVICE_API_KEY),
            "x-subscriber-id",
            &self.subscriber_id.to_string(),
        )
    }

    /// Sign a request as an administrator acting on the test subscriber.
    pub fn as_admin(&self, request: TestRequest) -> TestRequest {
        with_header(
            with_header(self.as_subscriber(request), "x-actor-role", "admin"),
            "x-actor",
            "ops@example.com",
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings used by [`TestHarness::new`].
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        service_api_key: Some(SERVICE_API_KEY.to_string()),
        ..ServiceConfig::default()
    }
}

/// Add a header to a test request.
pub fn with_header(request: TestRequest, name: &'static str, value: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static(name),
        HeaderValue::from_str(value).expect("Invalid header value"),
    )
}
