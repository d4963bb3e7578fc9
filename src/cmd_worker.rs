//! `cadence worker`.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use cadence_config::{Config, WorkKind};
use cadence_store::Database;
use cadence_worker::{EchoHandler, WorkerPool};

/// Run the worker loops until Ctrl-C.
pub(crate) async fn run_worker(
    config: Config,
    worker_id: Option<String>,
    kinds: Option<Vec<WorkKind>>,
    max_concurrency: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut worker = config.worker.clone();
    if worker_id.is_some() {
        worker.worker_id = worker_id;
    }
    if let Some(kinds) = kinds {
        worker.kinds = kinds;
    }
    if let Some(n) = max_concurrency {
        worker.max_concurrency = n;
    }

    let db = Database::open(&config.store.path, config.store.busy_timeout())
        .await?
        .with_lease(config.store.lease());

    info!("Starting Cadence worker v{}", env!("CARGO_PKG_VERSION"));
    match config.store.lease_secs {
        Some(secs) => info!("Lock lease: {}s", secs),
        None => info!("Lock lease disabled"),
    }

    let pool = WorkerPool::new(db, &worker, Arc::new(EchoHandler));
    let (shutdown, _) = broadcast::channel(1);
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(&shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, finishing running jobs");
    let _ = shutdown.send(());
    task.await?;

    Ok(())
}
