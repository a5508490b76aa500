//! Process-wide `tracing` setup.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives (default `info`). |
//! | `REACH_LOG_FORMAT` | `json` for newline-delimited JSON, anything else for compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | When set, spans are also exported over OTLP/HTTP. |
//!
//! ```rust,no_run
//! let _guard = reach_runtime::telemetry::init_tracing("reach");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("REACH_LOG_FORMAT").ok().as_deref())
    }
}

/// Install the global subscriber. Hold the returned guard until exit so
/// buffered spans are flushed.
///
/// Calling this twice keeps the first subscriber.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };
    let provider = otlp_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("reach")));

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt)
        .with(filter)
        .with(otel)
        .try_init()
    {
        eprintln!("[reach] tracing already initialised: {e}");
    }
    TracerProviderGuard(provider)
}

/// Shuts the OTLP provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[reach] span exporter shutdown failed: {e}");
            }
        }
    }
}

fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[reach] OTLP exporter unavailable: {e}"))
        .ok()?;
    let resource = Resource::builder().with_service_name(service_name.to_string()).build();
    // Simple exporter: the CLI initialises tracing before its runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
