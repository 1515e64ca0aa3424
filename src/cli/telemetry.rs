//! Logging and optional OTLP trace export.
//!
//! Traces are exported only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set. Spans
//! carry the commit the binary was built from so traces line up with deploys.

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

use crate::GIT_COMMIT_HASH;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Dependencies that are chatty below these levels.
const QUIET_DEPENDENCIES: &[&str] = &[
    "hyper=error",
    "h2=error",
    "tokio=error",
    "tower=warn",
    "reqwest=warn",
    "rustls=warn",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

/// Exporter settings read from the standard `OTEL_*` variables plus
/// `DEFYBLOG_ENVIRONMENT`.
#[derive(Debug, Default, PartialEq, Eq)]
struct TelemetryConfig {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: Option<String>,
    environment: Option<String>,
    resource_attributes: Vec<(String, String)>,
}

impl TelemetryConfig {
    fn from_env() -> Self {
        if let Ok(proto) = var("OTEL_EXPORTER_OTLP_PROTOCOL")
            && proto != "grpc"
        {
            debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{proto}' ignored: traces are exported over gRPC");
        }
        Self {
            endpoint: normalize_endpoint(
                var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            ),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_key_values(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID").ok(),
            environment: var("DEFYBLOG_ENVIRONMENT")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            resource_attributes: var("OTEL_RESOURCE_ATTRIBUTES")
                .map(|raw| parse_key_values(&raw))
                .unwrap_or_default(),
        }
    }

    /// Resource attributes; explicit `OTEL_RESOURCE_ATTRIBUTES` entries win
    /// over the built-in ones with the same key.
    fn resource_attributes(&self) -> Vec<KeyValue> {
        let instance_id = self
            .instance_id
            .clone()
            .unwrap_or_else(|| Ulid::new().to_string());
        let mut attributes: Vec<(String, String)> = vec![
            ("service.name".to_string(), env!("CARGO_PKG_NAME").to_string()),
            ("service.version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ("service.instance.id".to_string(), instance_id),
            ("vcs.revision".to_string(), GIT_COMMIT_HASH.to_string()),
        ];
        if let Some(environment) = &self.environment {
            attributes.push(("deployment.environment".to_string(), environment.clone()));
        }
        for (key, value) in &self.resource_attributes {
            attributes.retain(|(existing, _)| existing != key);
            attributes.push((key.clone(), value.clone()));
        }
        attributes
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect()
    }

    /// TLS server name for `https` endpoints.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }
}

/// Parse `key=value` pairs separated by commas, as used by
/// `OTEL_EXPORTER_OTLP_HEADERS` and `OTEL_RESOURCE_ATTRIBUTES`.
/// Entries without `=` or with an empty key are dropped.
fn parse_key_values(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

// Keys ending in "-bin" carry base64 values and become binary metadata.
fn headers_to_metadata(headers: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(headers.len());
    for (key, value) in headers {
        let key = key.to_ascii_lowercase();
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|err| anyhow!("header {key}: value is not base64: {err}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("header {key}: invalid binary key: {err}"))?;
            metadata.append_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("header {key}: invalid key: {err}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("header {key}: invalid value: {err}"))?;
            metadata.append(name, value);
        }
    }
    Ok(metadata)
}

/// gRPC endpoints without a scheme are assumed to be TLS.
fn normalize_endpoint(endpoint: String) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// Default directive from `-v` count, then `RUST_LOG`, then the quiet list.
fn env_filter(verbosity_level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy();
    for directive in QUIET_DEPENDENCIES {
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("invalid log directive {directive}"))?,
        );
    }
    Ok(filter)
}

fn init_tracer(config: &TelemetryConfig) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = config.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }
    if !config.headers.is_empty() {
        builder = builder.with_metadata(headers_to_metadata(&config.headers)?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(config.resource_attributes())
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber: pretty console output, plus the OTLP layer
/// when an endpoint is configured.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;

    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let config = TelemetryConfig::from_env();
        let tracer = init_tracer(&config)?;
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        debug!(endpoint = %config.endpoint, "OTLP trace export enabled");
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Flush pending spans. No-op when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        warn!("Failed to flush trace exporter: {err}");
    }
}
