use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ingestion_gateway::config::Config;
use ingestion_gateway::server::serve;

/// Resolves on SIGTERM (orchestrator stop) or Ctrl-C.
async fn stop_requested() {
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
        }
        Err(err) => {
            warn!("cannot listen for SIGTERM, only Ctrl-C will stop the gateway: {err}");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C either, the gateway stops only when killed: {err}");
                std::future::pending::<()>().await;
            }
        }
    }

    info!("stop requested, draining intake");
}

fn otlp_tracer(endpoint: &str, config: &Config) -> anyhow::Result<Tracer> {
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.otel_sampling_rate,
    )));
    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)?;
    Ok(tracer)
}

/// Logs go to stdout, filtered by RUST_LOG. Spans are also exported over OTLP
/// when OTEL_URL is set, from LOG_LEVEL up.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let stdout = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );

    let otlp = match &config.otel_url {
        Some(endpoint) => Some(OpenTelemetryLayer::new(otlp_tracer(endpoint, config)?)),
        None => None,
    }
    .with_filter(LevelFilter::from_level(config.log_level));

    tracing_subscriber::registry().with(stdout).with(otlp).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env()?;
    init_tracing(&config)?;

    let listener = TcpListener::bind(config.address).await?;
    info!(address = %config.address, "ingestion gateway listening");
    serve(config, listener, stop_requested()).await
}
