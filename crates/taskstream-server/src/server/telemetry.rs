//! Console logging plus optional OpenTelemetry export.
//!
//! A pretty `tracing_subscriber::fmt` layer filtered by `RUST_LOG` is always
//! installed. The cargo features add export on top of it:
//!
//! - `tracing`: spans and their events are exported through a tracer
//!   provider. Events outside a span only reach the console.
//! - `metrics`: the server's counters and histograms below are exported
//!   through a meter provider. Without it every recording function is a
//!   no-op.
//! - `stdout` / `honeycomb`: the exporters. Either or both, each with its own
//!   processor or reader. Honeycomb is configured from `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//!
//! ```bash
//! cargo run --bin taskstream-server --features tracing,metrics,stdout
//! ```

#[cfg(all(
    any(feature = "honeycomb", feature = "stdout"),
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!("The 'honeycomb' and 'stdout' exporters need 'tracing' or 'metrics' enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(all(
    any(feature = "metrics", feature = "tracing"),
    any(feature = "stdout", feature = "honeycomb")
))]
use std::time::Duration;

/// Providers that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

#[cfg(all(
    any(feature = "metrics", feature = "tracing"),
    any(feature = "stdout", feature = "honeycomb")
))]
const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .pretty(),
        );

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("taskstream")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    #[cfg(feature = "tracing")]
    let (registry, tracer_provider) = {
        use opentelemetry::trace::TracerProvider;

        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        let provider = tracer_provider()?;
        opentelemetry::global::set_tracer_provider(provider.clone());
        let layer = tracing_opentelemetry::layer()
            .with_tracer(provider.tracer_with_scope(scope.clone()))
            .with_error_records_to_exceptions(true);
        (registry.with(layer), provider)
    };

    #[cfg(feature = "metrics")]
    let (registry, meter_provider) = {
        let provider = meter_provider()?;
        opentelemetry::global::set_meter_provider(provider.clone());
        let _ = METRICS.set(Metrics::new(&opentelemetry::global::meter_with_scope(scope)));
        let layer = tracing_opentelemetry::MetricsLayer::new(provider.clone());
        (registry.with(layer), provider)
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("taskstream-server")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batched(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let exporter = Honeycomb::from_env()?
            .configure(opentelemetry_otlp::SpanExporter::builder().with_tonic())
            .build()
            .context("failed to build the span exporter")?;
        builder.with_span_processor(batched(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batched<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    let config = sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(EXPORT_INTERVAL)
        .with_max_queue_size(2048)
        .build();
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(config)
        .build()
}

#[cfg(feature = "metrics")]
fn meter_provider() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let exporter = Honeycomb::from_env()?
            .configure(opentelemetry_otlp::MetricExporter::builder().with_tonic())
            .with_temporality(sdkmetrics::Temporality::Delta)
            .build()
            .context("failed to build the metric exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

/// OTLP over gRPC to Honeycomb.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
struct Honeycomb {
    metadata: tonic::metadata::MetadataMap,
    endpoint: String,
    compression: opentelemetry_otlp::Compression,
}

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
impl Honeycomb {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let var = |name: &str| std::env::var(name).with_context(|| format!("missing `{name}`"));

        let mut metadata = tonic::metadata::MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            var("HONEYCOMB_API_KEY")?.parse().context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            var("HONEYCOMB_DATASET")?.parse().context("invalid dataset")?,
        );

        Ok(Self {
            metadata,
            endpoint: var("HONEYCOMB_ENDPOINT")?,
            compression: var("HONEYCOMB_COMPRESSION")?
                .to_ascii_lowercase()
                .parse()?,
        })
    }

    /// Applies the connection settings shared by the span and metric
    /// exporters.
    fn configure<B>(self, builder: B) -> B
    where
        B: opentelemetry_otlp::WithTonicConfig + opentelemetry_otlp::WithExportConfig,
    {
        builder
            .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
            .with_metadata(self.metadata)
            .with_compression(self.compression)
            .with_endpoint(self.endpoint)
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .with_timeout(Duration::from_secs(10))
    }
}

#[cfg(feature = "metrics")]
static METRICS: std::sync::OnceLock<Metrics> = std::sync::OnceLock::new();

/// Instruments recorded by the submission service.
#[cfg(feature = "metrics")]
struct Metrics {
    submissions: Counter<u64>,
    tasks_accepted: Counter<u64>,
    tasks_rejected: Counter<u64>,
    tasks_failed: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_errors: Counter<u64>,
    submission_duration: Histogram<f64>,
    result_bytes: Counter<u64>,
}

#[cfg(feature = "metrics")]
impl Metrics {
    fn new(meter: &opentelemetry::metrics::Meter) -> Self {
        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };

        Self {
            submissions: counter("submissions", "CreateLargeTasks streams opened"),
            tasks_accepted: counter("tasks_accepted", "Tasks accepted for execution"),
            tasks_rejected: counter("tasks_rejected", "Tasks rejected with a per-item error"),
            tasks_failed: counter("tasks_failed", "Accepted tasks that failed"),
            streams_inflight: meter
                .i64_up_down_counter("streams_inflight")
                .with_description("Open submission and result streams")
                .build(),
            stream_errors: counter("stream_errors", "Streams that ended in an error"),
            submission_duration: meter
                .f64_histogram("submission_duration")
                .with_unit("ms")
                .with_description("Time from stream open to aggregate reply")
                .build(),
            result_bytes: meter
                .u64_counter("result_bytes")
                .with_unit("By")
                .with_description("Result bytes streamed to clients")
                .build(),
        }
    }
}

#[cfg(feature = "metrics")]
fn record(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.get() {
        f(metrics);
    }
}

pub fn increment_submissions() {
    #[cfg(feature = "metrics")]
    record(|m| m.submissions.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn increment_tasks_accepted(count: u64) {
    #[cfg(feature = "metrics")]
    record(|m| m.tasks_accepted.add(count, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn increment_tasks_rejected(count: u64) {
    #[cfg(feature = "metrics")]
    record(|m| m.tasks_rejected.add(count, &[]));
}

pub fn increment_tasks_failed() {
    #[cfg(feature = "metrics")]
    record(|m| m.tasks_failed.add(1, &[]));
}

pub fn increment_streams_inflight() {
    #[cfg(feature = "metrics")]
    record(|m| m.streams_inflight.add(1, &[]));
}

pub fn decrement_streams_inflight() {
    #[cfg(feature = "metrics")]
    record(|m| m.streams_inflight.add(-1, &[]));
}

pub fn increment_stream_errors() {
    #[cfg(feature = "metrics")]
    record(|m| m.stream_errors.add(1, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn record_submission_duration(duration_ms: f64) {
    #[cfg(feature = "metrics")]
    record(|m| m.submission_duration.record(duration_ms, &[]));
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn increment_result_bytes(count: u64) {
    #[cfg(feature = "metrics")]
    record(|m| m.result_bytes.add(count, &[]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_before_init_is_a_no_op() {
        increment_submissions();
        increment_tasks_accepted(3);
        increment_tasks_rejected(1);
        increment_tasks_failed();
        increment_streams_inflight();
        decrement_streams_inflight();
        increment_stream_errors();
        record_submission_duration(1.5);
        increment_result_bytes(64);
    }
}
