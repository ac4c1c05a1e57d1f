//! # Off-ramp Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the repository adapter and the configured payout providers
//! - Start the HTTP server and the payout reconciliation poller

mod config;

use std::sync::Arc;

use opentelemetry::global;
use opentelemetry_sdk::{
    metrics::SdkMeterProvider, propagation::TraceContextPropagator, trace as sdktrace,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offramp_hex::{
    OfframpService, PayoutPoller, WebhookSecrets,
    inbound::{HttpServer, shutdown_signal},
};
use offramp_providers::{
    ChangeNowClient, ChangeNowWidget, NowPaymentsClient, ProviderRegistry, StripeClient, WiseClient,
};
use offramp_repo::build_repo;

use config::Config;

struct Telemetry {
    tracer_provider: sdktrace::SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    fn shutdown(self) {
        let _ = self.tracer_provider.shutdown();
        let _ = self.meter_provider.shutdown();
    }
}

/// OTLP exporters for traces and HTTP metrics. The endpoint comes from
/// `OTEL_EXPORTER_OTLP_ENDPOINT`.
fn init_telemetry() -> anyhow::Result<(sdktrace::Tracer, Telemetry)> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Use gRPC exporter with batch processing (non-blocking)
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;
    let tracer_provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    use opentelemetry::trace::TracerProvider as _;
    Ok((
        tracer_provider.tracer("offramp-service"),
        Telemetry {
            tracer_provider,
            meter_provider,
        },
    ))
}

/// Registers every provider whose credentials are configured.
fn build_providers(config: &Config) -> anyhow::Result<ProviderRegistry> {
    let mut providers = ProviderRegistry::new();
    if let Some(nowpayments) = config.nowpayments.clone() {
        providers.register(Arc::new(NowPaymentsClient::new(nowpayments)?));
    }
    if let Some(wise) = config.wise.clone() {
        providers.register(Arc::new(WiseClient::new(wise)?));
    }
    if let Some(stripe) = config.stripe.clone() {
        providers.register(Arc::new(StripeClient::new(stripe)?));
    }
    Ok(providers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let (otel_layer, telemetry) = if config.otlp_enabled {
        let (tracer, telemetry) = init_telemetry()?;
        (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(telemetry),
        )
    } else {
        (None, None)
    };

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,offramp_app=debug,offramp_hex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    tracing::info!("Starting off-ramp server on port {}", config.port);

    // Build repository (handles connection and migration)
    let repo = build_repo(&config.database_url).await?;

    let providers = build_providers(&config)?;
    if providers.is_empty() {
        tracing::warn!("no payout provider configured; payouts will be refused");
    } else {
        tracing::info!(providers = ?providers.kinds(), "payout providers registered");
    }

    let service = OfframpService::new(repo, providers)
        .with_webhook_secrets(WebhookSecrets {
            nowpayments_ipn: config.nowpayments_ipn_secret.clone(),
            ipn_scheme: config.ipn_scheme,
            stripe: config.stripe_webhook_secret.clone(),
        })
        .with_retry(config.retry)
        .with_widget(ChangeNowWidget::new(config.changenow.clone())?);
    let service = match &config.changenow_api {
        Some(api) => {
            tracing::info!(base_url = %api.base_url, "ChangeNOW API enabled");
            service.with_changenow_api(ChangeNowClient::new(api.clone())?)
        }
        None => service,
    };
    let service = Arc::new(service);

    let shutdown = CancellationToken::new();
    let poller = PayoutPoller::new(service.clone(), config.poll_interval);
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // Create and run the HTTP server
    let server = HttpServer::new(service, config.server.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let result = server.run(&addr, shutdown.clone()).await;

    shutdown.cancel();
    let _ = poller_task.await;

    // Ensure traces and metrics are flushed before exit
    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }
    result
}
