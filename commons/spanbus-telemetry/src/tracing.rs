use envconfig::Envconfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::otel_exporter::init_otlp_tracing_if_configured;

#[derive(Envconfig, Debug, Clone)]
pub struct TelemetryConfig {
    #[envconfig(from = "SPANBUS_SERVICE_NAME", default = "spanbus")]
    pub service_name: String,

    #[envconfig(from = "SPANBUS_LOG", default = "info")]
    pub log_level: String,

    #[envconfig(from = "SPANBUS_LOG_JSON", default = "false")]
    pub json_format: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "spanbus".to_string(),
            log_level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Guard that flushes and shuts down the OTLP pipeline on drop. Keep it
/// alive for the program's lifetime.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            let _ = provider.shutdown();
        }
    }
}

/// Initialize the global tracing subscriber: stdout logging plus OTLP
/// span export when the environment configures an endpoint.
pub fn setup_tracing(
    config: &TelemetryConfig,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_file(true)
        .with_line_number(true);

    let fmt_layer = if config.json_format {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = Registry::default().with(env_filter).with(fmt_layer);

    match init_otlp_tracing_if_configured(&config.service_name)? {
        Some((tracer, provider)) => {
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            Ok(TelemetryGuard {
                provider: Some(provider),
            })
        }
        None => {
            registry.try_init()?;
            Ok(TelemetryGuard { provider: None })
        }
    }
}
