//! `emqd`: serves the task broker over HTTP.
//!
//! Configuration comes from `EMQ_*` environment variables (a `.env` file is
//! read first when present); log verbosity from `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use prometheus_task_broker::builders::QueueServerBuilder;
use prometheus_task_broker::config::ServerConfig;
use prometheus_task_broker::core::AppResult;
use prometheus_task_broker::runtime::{router, SharedApi, TokioSpawner};
use prometheus_task_broker::util::init_tracing;

fn main() -> AppResult<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ServerConfig::from_env().map_err(anyhow::Error::msg)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> AppResult<()> {
    let server = QueueServerBuilder::new(config.broker.clone())
        .build(&TokioSpawner::current())
        .context("failed to start broker")?;
    let api: SharedApi = Arc::new(server.clone());
    let app = router(api, config.max_body_bytes);

    let listener = TcpListener::bind(config.bind_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        worker_threads = config.worker_threads,
        "emqd listening"
    );

    // Blocked waits must be woken before axum drains in-flight requests.
    let broker = server.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            broker.shutdown();
        })
        .await
        .context("http server failed")?;

    server.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
    tracing::info!("shutting down");
}
