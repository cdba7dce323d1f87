use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub otlp_endpoint: String,
}

impl From<&AppConfig> for TelemetryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            service_name: config.telemetry_service_name.clone(),
            service_version: config.telemetry_service_version.clone(),
            environment: config.telemetry_environment.clone(),
            otlp_endpoint: config.telemetry_otlp_endpoint.clone(),
        }
    }
}

/// JSON logs plus span export over OTLP. Returns the provider so the caller
/// can flush it on shutdown.
pub fn init_telemetry_with_subscriber(
    config: &TelemetryConfig,
    env_filter: EnvFilter,
) -> Result<sdktrace::SdkTracerProvider, Box<dyn std::error::Error>> {
    let resource = Resource::builder_empty()
        .with_attribute(KeyValue::new(SERVICE_NAME, config.service_name.clone()))
        .with_attribute(KeyValue::new(SERVICE_VERSION, config.service_version.clone()))
        .with_attribute(KeyValue::new(
            "deployment.environment.name",
            config.environment.clone(),
        ))
        .build();

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(config.service_name.clone());

    opentelemetry::global::set_tracer_provider(provider.clone());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .with(OpenTelemetryLayer::new(tracer))
        .init();

    tracing::info!(
        service = %config.service_name,
        endpoint = %config.otlp_endpoint,
        "OpenTelemetry initialized"
    );

    Ok(provider)
}

pub fn init_subscriber_without_telemetry(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

pub fn shutdown_telemetry(provider: sdktrace::SdkTracerProvider) {
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "failed to flush OpenTelemetry spans");
    }
    tracing::info!("OpenTelemetry tracer provider shutdown");
}
