use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;

use intake_infra::config::Config;
use intake_infra::queue::{DurableQueue, RedisListStore};
use intake_infra::sink::{postgres, PostgresReportSink};
use intake_infra::workers::{WorkerPool, WorkerPoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    intake_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let database_url = config.database_url()?.to_string();

    let list_store = RedisListStore::new(&config.redis_url, config.store_timeout)?;
    tokio::task::spawn_blocking({
        let list_store = list_store.clone();
        move || list_store.ping()
    })
    .await?
    .context("shared store unreachable")?;

    let pool = postgres::connect(&database_url, config.store_timeout)
        .await
        .context("database unreachable")?;
    postgres::migrate(&pool).await?;

    // Workers are OS threads; the sink drives its queries on this runtime.
    let sink = Arc::new(PostgresReportSink::new(
        pool.clone(),
        Handle::current(),
        config.store_timeout,
    ));
    let queue = DurableQueue::new(Arc::new(list_store));

    let pool_config = WorkerPoolConfig::default()
        .with_workers(config.worker_concurrency)
        .with_poll_timeout(config.queue_poll_timeout);
    let workers = WorkerPool::spawn(pool_config, queue, sink).context("failed to start workers")?;

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let deadline = config.shutdown_timeout;
    let summary = tokio::task::spawn_blocking(move || workers.shutdown(deadline)).await?;
    pool.close().await;

    if summary.abandoned > 0 {
        tracing::warn!(abandoned = summary.abandoned, "exiting with workers still running");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
