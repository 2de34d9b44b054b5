use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};

/// Install the W3C trace context propagator used for message header
/// injection and extraction. Safe to call more than once.
pub fn init_propagation() {
    opentelemetry::global::set_text_map_propagator(
        TraceContextPropagator::new(),
    );
}

/// Initialize the tracing OTLP exporter (gRPC).
/// Sampler can be configured via OTEL_TRACES_SAMPLER env var:
/// - "always_on" (default): Sample all traces
/// - "always_off": Sample no traces
/// - "traceidratio": Sample based on OTEL_TRACES_SAMPLER_ARG (0.0-1.0, default 0.1)
pub fn init_otlp_tracing(
    service_name: &str,
    endpoint: Option<&str>,
) -> Result<
    (opentelemetry_sdk::trace::Tracer, SdkTracerProvider),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let endpoint = endpoint.unwrap_or("http://localhost:4317");

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    // Configure sampler from OTEL_TRACES_SAMPLER env var
    let base_sampler: Box<dyn opentelemetry_sdk::trace::ShouldSample> =
        match std::env::var("OTEL_TRACES_SAMPLER")
            .unwrap_or_else(|_| "always_on".to_string())
            .to_lowercase()
            .as_str()
        {
            "always_off" => Box::new(Sampler::AlwaysOff),
            "traceidratio" => {
                let ratio = std::env::var("OTEL_TRACES_SAMPLER_ARG")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.1);
                Box::new(Sampler::TraceIdRatioBased(ratio))
            }
            // Handle "parentbased_always_on" which is the OTEL SDK standard
            "parentbased_always_on" => Box::new(Sampler::AlwaysOn),
            _ => Box::new(Sampler::AlwaysOn), // "always_on" or any other value
        };

    // Wrap in ParentBased to respect incoming trace context sampling decisions
    let sampler = Sampler::ParentBased(base_sampler);

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(sampler)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(service_name.to_string());

    opentelemetry::global::set_tracer_provider(provider.clone());
    init_propagation();

    Ok((tracer, provider))
}

/// Initialize the tracing OTLP exporter if configured in env. The
/// propagator is installed either way, so context still flows through
/// message headers when no exporter is running.
/// Env vars:
/// - OTEL_EXPORTER_OTLP_ENDPOINT or OTEL_EXPORTER_OTLP_TRACES_ENDPOINT (required to enable)
/// - OTEL_SERVICE_NAME (optional override)
pub fn init_otlp_tracing_if_configured(
    default_service: &str,
) -> Result<
    Option<(opentelemetry_sdk::trace::Tracer, SdkTracerProvider)>,
    Box<dyn std::error::Error + Send + Sync>,
> {
    // Check for traces-specific endpoint first, then fallback to general OTLP endpoint
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
        .or_else(|_| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
        .ok()
        .filter(|v| !v.trim().is_empty());
    let endpoint = match endpoint {
        Some(v) => v,
        None => {
            init_propagation();
            return Ok(None);
        }
    };
    let service_name = std::env::var("OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| default_service.to_string());

    let (tracer, provider) = init_otlp_tracing(&service_name, Some(&endpoint))?;
    Ok(Some((tracer, provider)))
}
