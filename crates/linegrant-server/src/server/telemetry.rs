//! # Telemetry Features
//!
//! Console logging through `tracing-subscriber` is always on and filtered by
//! `RUST_LOG` (default `info`). OpenTelemetry export is opt-in:
//!
//! - `otel-tracing`: export spans (claim and ingest cycles, HTTP handlers).
//! - `metrics`: export claim counters and histograms.
//! - `honeycomb`: OTLP/gRPC exporter, configured from `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//! - `stdout`: print exported spans/metrics to stdout.
//!
//! Exporters require at least one of `otel-tracing` or `metrics`. Both
//! exporters may be enabled at once.
//!
//! ```bash
//! cargo run -p linegrant-server --features otel-tracing,metrics,honeycomb
//! cargo run -p linegrant-server --features metrics,stdout
//! ```
//!
//! The metric helpers below compile to no-ops without `metrics`, so call
//! sites never need their own `cfg`.

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "otel-tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'otel-tracing' or 'metrics' to be enabled."
);

#[cfg(all(
    feature = "stdout",
    not(any(feature = "otel-tracing", feature = "metrics"))
))]
compile_error!(
    "The 'stdout' feature requires at least one of 'otel-tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(
    feature = "honeycomb",
    any(feature = "metrics", feature = "otel-tracing")
))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "linegrant";

/// Exporter providers that must be flushed and shut down on exit.
pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending spans/metrics and shuts the exporters down.
    ///
    /// Errors are printed rather than logged since the subscriber may already
    /// be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Human-readable console output, independent of any exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "otel-tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

/// Connection settings shared by the Honeycomb span and metric exporters.
#[cfg(all(
    feature = "honeycomb",
    any(feature = "metrics", feature = "otel-tracing")
))]
struct HoneycombSettings {
    endpoint: String,
    compression: Compression,
    metadata: tonic::metadata::MetadataMap,
}

#[cfg(all(
    feature = "honeycomb",
    any(feature = "metrics", feature = "otel-tracing")
))]
impl HoneycombSettings {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use core::str::FromStr;

        let var = |name: &'static str| {
            std::env::var(name).with_context(|| format!("missing `{name}`"))
        };

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
            endpoint: var("HONEYCOMB_ENDPOINT")?,
            compression: Compression::from_str(
                &var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase(),
            )?,
            metadata,
        })
    }

    fn tls() -> tonic::transport::ClientTlsConfig {
        tonic::transport::ClientTlsConfig::new().with_native_roots()
    }
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let reader =
            sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(std::time::Duration::from_secs(5))
                .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(HoneycombSettings::tls())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "otel-tracing")]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_processor(
        opentelemetry_stdout::SpanExporter::default(),
    ));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let settings = HoneycombSettings::from_env()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(HoneycombSettings::tls())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static CLAIMS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CLAIMS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CLAIM_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CLAIM_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static LINES_PER_CLAIM: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static LINES_GRANTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static LINES_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static LINES_INGESTED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = CLAIMS.set(
        meter
            .u64_counter("claims")
            .with_description("Total claim requests")
            .build(),
    );
    let _ = CLAIMS_INFLIGHT.set(
        meter
            .i64_up_down_counter("claims_inflight")
            .with_description("Claim requests awaiting their cycle")
            .build(),
    );
    let _ = CLAIM_FAILURES.set(
        meter
            .u64_counter("claim_failures")
            .with_description("Claim calls that failed closed")
            .build(),
    );
    let _ = CLAIM_DURATION_MS.set(
        meter
            .f64_histogram("claim_duration")
            .with_unit("ms")
            .with_description("Queue wait plus claim cycle")
            .build(),
    );
    let _ = LINES_PER_CLAIM.set(
        meter
            .f64_histogram("lines_per_claim")
            .with_description("Filtered candidates per claim request")
            .build(),
    );
    let _ = LINES_GRANTED.set(
        meter
            .u64_counter("lines_granted")
            .with_description("Lines granted to a caller")
            .build(),
    );
    let _ = LINES_REJECTED.set(
        meter
            .u64_counter("lines_rejected")
            .with_description("Lines denied to a caller")
            .build(),
    );
    let _ = LINES_INGESTED.set(
        meter
            .u64_counter("lines_ingested")
            .with_description("Lines written through the ingestion endpoint")
            .build(),
    );
}

macro_rules! counter_fn {
    ($(#[$doc:meta])* $name:ident, $handle:ident) => {
        $(#[$doc])*
        #[cfg(feature = "metrics")]
        pub fn $name(count: u64) {
            if let Some(counter) = $handle.get() {
                counter.add(count, &[]);
            }
        }

        $(#[$doc])*
        #[cfg(not(feature = "metrics"))]
        pub fn $name(_count: u64) {}
    };
}

macro_rules! histogram_fn {
    ($(#[$doc:meta])* $name:ident, $handle:ident) => {
        $(#[$doc])*
        #[cfg(feature = "metrics")]
        pub fn $name(value: f64) {
            if let Some(histogram) = $handle.get() {
                histogram.record(value, &[]);
            }
        }

        $(#[$doc])*
        #[cfg(not(feature = "metrics"))]
        pub fn $name(_value: f64) {}
    };
}

counter_fn!(add_claims, CLAIMS);
counter_fn!(add_claim_failures, CLAIM_FAILURES);
counter_fn!(add_lines_granted, LINES_GRANTED);
counter_fn!(add_lines_rejected, LINES_REJECTED);
counter_fn!(add_lines_ingested, LINES_INGESTED);
histogram_fn!(
    /// Milliseconds from admission to reply.
    record_claim_duration,
    CLAIM_DURATION_MS
);
histogram_fn!(record_lines_per_claim, LINES_PER_CLAIM);

#[cfg(feature = "metrics")]
pub fn adjust_claims_inflight(delta: i64) {
    if let Some(counter) = CLAIMS_INFLIGHT.get() {
        counter.add(delta, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn adjust_claims_inflight(_delta: i64) {}
