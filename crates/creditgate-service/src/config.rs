//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use creditgate_core::{
    FeatureCatalog, GuardPolicy, PricingConfig, RetryPolicy, DEFAULT_GUARD_TIMEOUT,
    DEFAULT_MAX_SINGLE_REQUEST_COST, DEFAULT_SECURITY_BUFFER,
};

use crate::metering::MeteringConfig;

/// Default number of metered calls per subscriber per window.
const DEFAULT_RATE_LIMIT_MAX: u32 = 60;

/// Default rate-limit window.
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// Which ledger backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// In-process ledger. State is lost on restart.
    #[default]
    Memory,
    /// `RocksDB` under `DATA_DIR`.
    RocksDb,
    /// PostgreSQL at `DATABASE_URL`.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/creditgate").
    pub data_dir: String,

    /// Ledger backend (default: memory).
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string, required for the postgres backend.
    pub database_url: Option<String>,

    /// Shared key the upstream gateway presents in `x-api-key`.
    pub service_api_key: Option<String>,

    /// Usage guard thresholds.
    pub guard: GuardPolicy,

    /// Metered calls allowed per subscriber per window.
    pub rate_limit_max: u32,

    /// Rate-limit window length.
    pub rate_limit_window: Duration,

    /// Inference upstream URL. Without it metered calls fail as upstream errors.
    pub inference_url: Option<String>,

    /// Inference upstream API key (optional).
    pub inference_api_key: Option<String>,

    /// Retry schedule for inference transport failures.
    pub inference_retry: RetryPolicy,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Pricing configuration.
    pub pricing: PricingConfig,

    /// Metered features.
    pub features: FeatureCatalog,
}

/// Inference secrets file structure.
#[derive(Debug, Deserialize)]
struct InferenceSecrets {
    url: String,
    #[serde(default)]
    api_key: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (inference_url, inference_api_key) = load_inference_secrets();

        let store_backend = std::env::var("STORE_BACKEND")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring STORE_BACKEND, using memory");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/creditgate".into()),
            store_backend,
            database_url: std::env::var("DATABASE_URL").ok(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            guard: GuardPolicy {
                security_buffer: env_or("SECURITY_BUFFER", DEFAULT_SECURITY_BUFFER),
                max_single_request_cost: env_or(
                    "MAX_SINGLE_REQUEST_COST",
                    DEFAULT_MAX_SINGLE_REQUEST_COST,
                ),
                max_cumulative_shortfall: env_parse("MAX_CUMULATIVE_SHORTFALL"),
                timeout: env_parse("GUARD_TIMEOUT_MS")
                    .map_or(DEFAULT_GUARD_TIMEOUT, Duration::from_millis),
            },
            rate_limit_max: env_or("RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX),
            rate_limit_window: Duration::from_secs(env_or(
                "RATE_LIMIT_WINDOW_SECONDS",
                DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            )),
            inference_url,
            inference_api_key,
            inference_retry: RetryPolicy::default(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", 1024 * 1024), // 1MB
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", 30),
            pricing: PricingConfig::default(),
            features: FeatureCatalog::default(),
        }
    }

    /// Settings for the metering service.
    #[must_use]
    pub fn metering(&self) -> MeteringConfig {
        MeteringConfig {
            policy: self.guard.clone(),
            pricing: self.pricing.clone(),
            features: self.features.clone(),
            rate_limit_max: self.rate_limit_max,
            rate_limit_window: self.rate_limit_window,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}

/// Load inference upstream secrets from file or environment.
fn load_inference_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/inference.json",
        "creditgate/.secrets/inference.json",
        "../.secrets/inference.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<InferenceSecrets>(path) {
            tracing::info!(path = %path, "Loaded inference secrets from file");
            return (Some(secrets.url), secrets.api_key);
        }
    }

    tracing::debug!("Inference secrets file not found, using environment variables");
    (
        std::env::var("INFERENCE_URL").ok(),
        std::env::var("INFERENCE_API_KEY").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/creditgate".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            service_api_key: None,
            guard: GuardPolicy::default(),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            inference_url: None,
            inference_api_key: None,
            inference_retry: RetryPolicy::default(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingConfig::default(),
            features: FeatureCatalog::default(),
        }
    }
}
