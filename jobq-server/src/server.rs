//! Wires the service together and owns the shutdown sequence.

use std::future::Future;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use jobq_common::metrics::MetricsRegistry;
use jobq_common::registry::JobRegistry;

use crate::config::Config;
use crate::dispatch;
use crate::handlers::{router, AppState};
use crate::processor::{Processor, SleepProcessor};
use crate::sweeper::Sweeper;
use crate::worker::Worker;

/// Bind the configured address and serve until an interrupt or terminate
/// signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let processor = Arc::new(SleepProcessor::new(config.processing_duration.0));

    run_with_processor(config, processor).await
}

/// Like [`run`], with an injectable processor.
pub async fn run_with_processor(config: Config, processor: Arc<dyn Processor>) -> Result<()> {
    let bind = config.bind();
    let listener = TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("failed to bind {bind}"))?;

    serve(config, processor, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };
}

/// Serve on a bound listener until `shutdown` resolves, then drive the
/// shutdown sequence.
///
/// The order of the sequence is load-bearing: admissions are rejected
/// before the listener stops, producers stop before consumers, and the
/// dispatch channel closes only once every sender and receiver is gone.
/// Reordering these steps risks sends on a closed channel or jobs
/// stranded in `Processing`.
pub async fn serve<F>(
    config: Config,
    processor: Arc<dyn Processor>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    config.validate()?;

    let registry = Arc::new(JobRegistry::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let (sender, receiver) = dispatch::channel(config.queue_capacity);

    let admission = CancellationToken::new();
    let http_shutdown = CancellationToken::new();
    let sweeper_shutdown = CancellationToken::new();
    let worker_shutdown = CancellationToken::new();

    let state = AppState {
        registry: registry.clone(),
        metrics: metrics.clone(),
        dispatcher: sender.clone(),
        admission: admission.clone(),
    };
    let app = router(state, config.request_body_limit, config.request_timeout.0);

    let address = listener
        .local_addr()
        .wrap_err("listener has no local address")?;
    info!(%address, "listening");

    let mut server = {
        let token = http_shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        })
    };

    let sweeper = tokio::spawn(
        Sweeper::new(
            registry.clone(),
            metrics.clone(),
            sender.clone(),
            config.sweeper_interval.0,
            config.max_attempts,
            sweeper_shutdown.clone(),
        )
        .run(),
    );

    let mut workers = JoinSet::new();
    for id in 0..config.worker_count {
        workers.spawn(
            Worker::new(
                id,
                registry.clone(),
                metrics.clone(),
                processor.clone(),
                receiver.clone(),
                worker_shutdown.clone(),
            )
            .run(),
        );
    }

    shutdown.await;

    info!("shutdown requested, rejecting new admissions");
    admission.cancel();

    info!(timeout = ?config.server_shutdown_timeout.0, "stopping http server");
    http_shutdown.cancel();
    match tokio::time::timeout(config.server_shutdown_timeout.0, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(%err, "http server terminated with an error"),
        Ok(Err(err)) => error!(%err, "http server task panicked"),
        Err(_) => {
            error!("http server exceeded its shutdown budget, aborting");
            server.abort();
            if let Ok(Err(err)) = server.await {
                error!(%err, "http server terminated with an error");
            }
        }
    }

    info!("stopping sweeper");
    sweeper_shutdown.cancel();
    if let Err(err) = sweeper.await {
        error!(%err, "sweeper task panicked");
    }

    info!("stopping workers");
    worker_shutdown.cancel();
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            error!(%err, "worker task panicked");
        }
    }

    // Every other sender clone died with its component; dropping the last
    // one closes the dispatch channel.
    drop(sender);

    info!("shutdown complete");
    Ok(())
}
