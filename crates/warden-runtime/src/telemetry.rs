//! Tracing and OpenTelemetry initialisation for Warden.
//!
//! Call [`init_tracing`] once at process startup.  Every governance component
//! emits structured `tracing` events (breaker transitions, short-circuits,
//! bypass attempts, degraded persistence); this module decides where they go.
//!
//! # Environment variables
//!
//! Environment always wins over [`TelemetryConfig`].
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). Activates the OTLP/HTTP span exporter. |
//! | `RUST_LOG` | Log filter (default from config, `"info"`). |
//! | `WARDEN_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_runtime::telemetry::{init_tracing, TelemetryConfig};
//!
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = init_tracing("warden", &TelemetryConfig::default());
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub json: bool,
    /// OTLP/HTTP collector endpoint used when the env-var is unset.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json: false,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    /// Apply `RUST_LOG`, `WARDEN_LOG_FORMAT` and `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                self.log_filter = filter;
            }
        }
        match std::env::var("WARDEN_LOG_FORMAT").as_deref() {
            Ok("json") => self.json = true,
            Ok("compact") | Ok("text") => self.json = false,
            _ => {}
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.otlp_endpoint = Some(endpoint);
            }
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber.
///
/// With an OTLP endpoint configured, spans are also exported to the
/// collector.  Without one, output is a plain console formatter.  Log
/// lines always go to stderr.
///
/// Installing twice is harmless: the second call leaves the first subscriber
/// in place.  The returned [`TracerProviderGuard`] must be held for the
/// lifetime of the process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, config: &TelemetryConfig) -> TracerProviderGuard {
    let config = config.clone().with_env_overrides();
    let env_filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(service_name, endpoint));

    let installed = if let Some(ref p) = provider {
        let tracer = p.tracer("warden");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        if config.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).compact())
                .try_init()
        }
    } else if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).compact())
            .try_init()
    };

    if let Err(e) = installed {
        eprintln!("[warden] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported to a collector.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[warden] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `None` when the exporter cannot be built; the error goes to stderr and the
/// caller falls back to console output.
fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.to_string())
        .build()
        .map_err(|e| eprintln!("[warden] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Synchronous exporter: no Tokio runtime exists yet when the CLI
            // calls init_tracing.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_win_over_config() {
        // SAFETY: single test touching these env-vars.
        unsafe {
            std::env::set_var("WARDEN_LOG_FORMAT", "json");
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        }
        let config = TelemetryConfig::default().with_env_overrides();
        assert!(config.json);
        assert_eq!(config.otlp_endpoint, None);
        unsafe { std::env::remove_var("WARDEN_LOG_FORMAT") };
    }

    #[test]
    fn guard_without_provider_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = TelemetryConfig {
            log_filter: "not a [valid filter".to_string(),
            ..TelemetryConfig::default()
        };
        let _a = init_tracing("warden-test", &config);
        let _b = init_tracing("warden-test", &config);
    }
}
