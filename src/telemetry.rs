//! Log subscriber and tracer provider setup
//!
//! Logging goes through `tracing` with either human-readable or JSON
//! output. Spans for the verification path are OpenTelemetry spans owned by
//! a provider built here; they are exported over OTLP/HTTP when an endpoint
//! is configured and dropped otherwise.

use anyhow::Result;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, TracingConfig};
use crate::error::TowerError;

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. The `debug` flag
/// raises the configured level to `debug`.
///
/// # Errors
///
/// Returns error if the filter directive is invalid or a global subscriber
/// is already installed
pub fn init_logging(config: &Config) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_directive()))
        .map_err(|e| TowerError::Telemetry(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.logging.json_format {
        let stdout_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);
        registry.with(stdout_layer).try_init()
    } else {
        let stdout_layer = fmt::layer().with_target(true).with_level(true);
        registry.with(stdout_layer).try_init()
    };

    installed.map_err(|e| TowerError::Telemetry(format!("Logging already set up: {}", e)))?;
    Ok(())
}

/// Build the tracer provider for the verification spans
///
/// # Errors
///
/// Returns error if the OTLP exporter cannot be built
pub fn init_tracer_provider(config: &TracingConfig) -> Result<SdkTracerProvider> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();
    let mut builder = SdkTracerProvider::builder().with_resource(resource);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint.clone())
            .build()
            .map_err(|e| TowerError::Telemetry(format!("OTLP exporter: {}", e)))?;
        builder = builder.with_batch_exporter(exporter);
        tracing::info!(endpoint = %endpoint, "Exporting spans over OTLP");
    } else {
        tracing::debug!("No OTLP endpoint configured, spans are not exported");
    }

    Ok(builder.build())
}

/// Flush and stop the tracer provider
pub fn shutdown_tracer_provider(provider: &SdkTracerProvider) {
    if let Err(e) = provider.shutdown() {
        tracing::warn!("Tracer provider shutdown failed: {}", e);
    }
}
