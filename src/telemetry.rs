use opentelemetry::trace::TraceId;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

const SERVICE_NAME: &str = "workspaces-controller";

/// Output format of the log lines on stdout, picked with `LOG_FORMAT`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Trace id of the span the caller runs in, if it belongs to an exported trace.
/// Reconcile failures carry it so events can be matched with their trace.
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    let trace_id = tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id();
    (trace_id != TraceId::INVALID).then_some(trace_id)
}

#[cfg(feature = "telemetry")]
fn resource() -> opentelemetry_sdk::Resource {
    use opentelemetry::KeyValue;

    let mut attributes = vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))];
    // set from the downward api in the controller deployment
    if let Ok(namespace) = std::env::var("POD_NAMESPACE") {
        attributes.push(KeyValue::new("k8s.namespace.name", namespace));
    }
    opentelemetry_sdk::Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attributes(attributes)
        .build()
}

#[cfg(feature = "telemetry")]
fn init_tracer_provider() -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use anyhow::Context as _;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};

    let endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .context("OPENTELEMETRY_ENDPOINT_URL must point at an OTLP collector")?;

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to create OTLP span exporter")?;

    Ok(opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Install the global subscriber.
///
/// `RUST_LOG` filters what is logged (info by default) and `LOG_FORMAT=json` switches
/// stdout to one json object per line. With the `telemetry` feature, spans are also
/// exported to the collector at `OPENTELEMETRY_ENDPOINT_URL`.
pub fn init() -> anyhow::Result<()> {
    #[cfg(feature = "telemetry")]
    let otel = {
        use opentelemetry::trace::TracerProvider;
        let provider = init_tracer_provider()?;
        let tracer = provider.tracer(SERVICE_NAME);
        // the global handle keeps the batch exporter running
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    };

    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    let compact = (format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());
    let json = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let registry = Registry::default();
    #[cfg(feature = "telemetry")]
    let registry = registry.with(otel);
    let subscriber = registry.with(compact).with(json).with(filter);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
