use std::collections::HashMap;

use opentelemetry::trace::TracerProvider as TracerProviderTrait;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const NAMESPACE_KEY: &str = "k8s.namespace.name";

/// Where and as whom spans are reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig<'a> {
    pub service_name: &'a str,
    pub service_version: &'a str,
    /// Namespace the operator manages pools in, attached to every span.
    pub namespace: Option<&'a str>,
    /// OTLP/HTTP endpoint; spans are only exported when set.
    pub otlp_endpoint: Option<&'a str>,
    pub otlp_token: Option<&'a str>,
}

impl TelemetryConfig<'_> {
    fn resource(&self) -> Resource {
        let mut attributes = vec![
            KeyValue::new("service.name", self.service_name.to_string()),
            KeyValue::new("service.version", self.service_version.to_string()),
        ];
        if let Some(ns) = self.namespace.filter(|ns| !ns.is_empty()) {
            attributes.push(KeyValue::new(NAMESPACE_KEY, ns.to_string()));
        }
        Resource::new(attributes)
    }

    fn export_headers(&self) -> HashMap<String, String> {
        self.otlp_token
            .filter(|t| !t.is_empty())
            .map(|t| ("Authorization".to_string(), format!("Bearer {t}")))
            .into_iter()
            .collect()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_stdout_only() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Installs the global subscriber: env-filtered stdout logs, plus OTLP span
/// export when an endpoint is configured.
///
/// Returns the provider when export is enabled. The caller must keep it and
/// call `shutdown()` before exit so batched spans are flushed.
pub fn init_tracing(config: &TelemetryConfig<'_>) -> Option<TracerProvider> {
    let Some(endpoint) = config.otlp_endpoint else {
        init_stdout_only();
        return None;
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(config.export_headers())
        .build();
    let exporter = match exporter {
        Ok(exporter) => exporter,
        Err(err) => {
            // no subscriber yet, so this cannot go through tracing
            eprintln!("failed to create OTLP exporter for {endpoint}: {err}; logging to stdout only");
            init_stdout_only();
            return None;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(config.resource())
        .build();
    let tracer = provider.tracer(config.service_name.to_string());

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!(
        endpoint,
        service = config.service_name,
        namespace = config.namespace.unwrap_or_default(),
        "exporting spans over OTLP"
    );
    Some(provider)
}
