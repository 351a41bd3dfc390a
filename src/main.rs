use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quota_queue_sync::controller::{ControllerConfig, ControllerRegistry, QuotaController};
use quota_queue_sync::notify::{channel_feed, forward_lines};
use quota_queue_sync::server::{AppState, build_router};
use quota_queue_sync::store::InMemoryQueueStore;

/// Capacity of the channel between the stdin reader and the controller.
const FEED_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quota_queue_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ControllerConfig::from_env().context("reading configuration")?;
    info!(
        workers = config.workers,
        max_requeue = config.max_requeue,
        suffixes = ?config.suffixes,
        gpu_resource = %config.gpu_resource,
        unchanged = ?config.unchanged,
        retry_qps = config.bucket.qps,
        retry_burst = config.bucket.burst,
        "Loaded configuration"
    );

    let store = InMemoryQueueStore::new();
    let (sender, feed) = channel_feed(FEED_CAPACITY);
    let controller = QuotaController::from_config(&config, feed, store);

    let mut registry = ControllerRegistry::new();
    registry.register(Arc::new(controller))?;
    let registry = Arc::new(registry);

    let shutdown = CancellationToken::new();

    // Notifications arrive as JSON lines on stdin.
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = forward_lines(stdin, &sender).await {
            error!(error = %e, "Feed reader stopped");
        }
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl-c, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c, shutting down"),
        }
        signal_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("listening on {}", config.listen_addr);

    let app = build_router(AppState::new(Arc::clone(&registry)));
    let server_token = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_token.cancelled_owned())
            .await
    });

    let result = registry.run_all(shutdown.clone()).await;
    shutdown.cancel();
    server.await?.context("serving HTTP")?;

    result?;
    info!("Shut down cleanly");
    Ok(())
}
