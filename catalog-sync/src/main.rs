use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use catalog_sync::{
    app_context::AppContext,
    codec::ValueDecoder,
    config::Config,
    consumer::{ConsumerLoop, LoopStats},
    health::HealthRegistry,
    kafka_source::KafkaSource,
    metrics::{serve, setup_metrics_routes},
    reconciler::{DocumentStatusReconciler, ProductQuantityReconciler},
};
use envconfig::Envconfig;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "catalog sync service"
}

fn start_health_liveness_server(
    config: &Config,
    liveness: HealthRegistry,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, e);
        }
    }))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let Ok(mut term) = signal::unix::signal(signal::unix::SignalKind::terminate()) else {
        error!("failed to register SIGTERM handler");
        return;
    };
    let Ok(mut interrupt) = signal::unix::signal(signal::unix::SignalKind::interrupt()) else {
        error!("failed to register SIGINT handler");
        return;
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Caught signal, shutting down consumers");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;
    let context = AppContext::new(&config).await?;
    let decoder = ValueDecoder::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let liveness_deadline = config.liveness_deadline();

    // Every subscription must succeed before any loop starts consuming
    let stock_source = match config.mode.runs_stocks() {
        true => Some(
            KafkaSource::subscribe(
                &config.kafka,
                &config.consumer,
                &config.product_stock_topic,
                &decoder,
            )
            .await?,
        ),
        false => None,
    };
    let document_source = match config.mode.runs_document_statuses() {
        true => Some(
            KafkaSource::subscribe(
                &config.kafka,
                &config.consumer,
                &config.document_status_topic,
                &decoder,
            )
            .await?,
        ),
        false => None,
    };

    let mut loops: Vec<(String, JoinHandle<LoopStats>)> = Vec::new();

    if let Some(source) = stock_source {
        let topic = config.product_stock_topic.clone();
        let reconciler = ProductQuantityReconciler::new(Arc::clone(&context.catalog));
        let consumer = ConsumerLoop::new(source, reconciler, shutdown.clone())
            .with_commit_policy(config.commit_policy)
            .with_poll_timeout(config.poll_timeout())
            .with_decoder(decoder.clone())
            .with_liveness(
                context
                    .liveness
                    .register(format!("consumer:{topic}"), liveness_deadline),
            );
        loops.push((topic, tokio::spawn(consumer.run())));
    }

    if let Some(source) = document_source {
        let topic = config.document_status_topic.clone();
        let reconciler = DocumentStatusReconciler::new(Arc::clone(&context.documents))
            .with_noop_check(config.document_noop_check);
        let consumer = ConsumerLoop::new(source, reconciler, shutdown.clone())
            .with_commit_policy(config.commit_policy)
            .with_poll_timeout(config.poll_timeout())
            .with_decoder(decoder.clone())
            .with_liveness(
                context
                    .liveness
                    .register(format!("consumer:{topic}"), liveness_deadline),
            );
        loops.push((topic, tokio::spawn(consumer.run())));
    }

    start_health_liveness_server(&config, context.liveness.clone())?;
    tokio::spawn(shutdown_signal(shutdown.clone()));

    for (topic, handle) in loops {
        let stats = handle.await?;
        info!(topic = %topic, ?stats, "consumer stopped");
    }

    context.pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
