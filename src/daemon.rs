use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::scheduler::{Providers, Scheduler};
use crate::{db, scheduler, server};

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let scheduler = Arc::new(Scheduler::new(pool.clone(), &config, Providers::from_config(&config)));

    let interrupted = scheduler
        .recover_interrupted()
        .await
        .context("recovering interrupted jobs")?;
    if interrupted > 0 {
        warn!(count = interrupted, "jobs from a previous run were interrupted, retry them to run again");
    }

    let cancel = CancellationToken::new();

    let scheduler_handle = tokio::spawn(scheduler::scheduler_loop(
        scheduler.clone(),
        config.tick_interval(),
        cancel.clone(),
    ));

    let router = server::build_router(server::AppState { scheduler });
    let listener = tokio::net::TcpListener::bind(&config.autoscribe.listen)
        .await
        .with_context(|| format!("binding to {}", config.autoscribe.listen))?;

    info!(listen = %config.autoscribe.listen, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    // A slot mid-generation is abandoned after the timeout; the next start
    // marks its job as interrupted.
    let shutdown_timeout = std::time::Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, async {
        let _ = scheduler_handle.await;
        let _ = server_handle.await;
    })
    .await
    .is_err()
    {
        warn!("shutdown timed out waiting for background tasks");
    }

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, waiting for Ctrl-C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
