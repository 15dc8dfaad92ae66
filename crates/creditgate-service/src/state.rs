//! Application state.

use std::sync::Arc;

use creditgate_store::LedgerStore;

use crate::config::ServiceConfig;
use crate::metering::MeteringService;
use crate::operation::{CostedOperation, HttpInference, UnconfiguredOperation};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger backend.
    pub store: Arc<dyn LedgerStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Guard, limiter and reconciliation.
    pub metering: Arc<MeteringService>,
}

impl AppState {
    /// Create a new application state, calling the configured inference
    /// upstream for metered operations.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, config: ServiceConfig) -> Self {
        let operation: Arc<dyn CostedOperation> = match config.inference_url.as_ref() {
            Some(url) => match HttpInference::new(
                url.clone(),
                config.inference_api_key.clone(),
                config.inference_retry.clone(),
            ) {
                Ok(client) => {
                    tracing::info!(inference_url = %url, "Inference upstream enabled");
                    Arc::new(client)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create inference client");
                    Arc::new(UnconfiguredOperation)
                }
            },
            None => {
                tracing::warn!("Inference upstream not configured - metered calls will fail");
                Arc::new(UnconfiguredOperation)
            }
        };

        Self::with_operation(store, config, operation)
    }

    /// Create a new application state around a specific costed operation.
    #[must_use]
    pub fn with_operation(
        store: Arc<dyn LedgerStore>,
        config: ServiceConfig,
        operation: Arc<dyn CostedOperation>,
    ) -> Self {
        let metering = Arc::new(MeteringService::new(
            store.clone(),
            operation,
            config.metering(),
        ));

        Self {
            store,
            config,
            metering,
        }
    }
}
