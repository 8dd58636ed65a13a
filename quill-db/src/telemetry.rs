//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Binaries call
//! [`init_tracing`] once at startup to print them. Cache consistency
//! warnings use the `quill::consistency` target, so they can be raised or
//! silenced on their own, e.g. `RUST_LOG=info,quill::consistency=off`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{StoreError, StoreResult};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "quill_db=info,quill_cache=info,info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create TelemetryConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `QUILL_LOG_JSON`: `true` or `1` for JSON output (default: false)
    pub fn from_env() -> Self {
        Self {
            json: std::env::var("QUILL_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails (without side effects) if a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> StoreResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| StoreError::config("tracing", format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(json = config.json, "Tracing initialized");
    Ok(())
}
