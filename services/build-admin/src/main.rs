//! Build admin service.
//!
//! Supervises the fleet of generation builds: serves the RPC surface, runs the
//! scheduling tick, the catalog reconciler, liveness monitoring and obsolete
//! data collection. A liveness fault terminates the process so that a standby
//! can take over leadership.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use buildadmin_server::{
    api,
    catalog::{
        CatalogAwareFactory, CatalogIdMap, CatalogReconciler, CatalogWorker, HttpCatalogClient,
    },
    cleanup::{GcWorker, ObsoleteDataCollector},
    config,
    job::{JobFactory, StoreGenerationFactory},
    liveness::LivenessMonitor,
    metrics,
    orchestrator::{FleetOrchestrator, ScheduleWorker},
    prohibited::ProhibitedHostSet,
    scheduler::{HttpWorkerScheduler, RecordingScheduler, WorkerScheduler},
    state::AppState,
    store::{CoordinationStore, FsStore},
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status after a liveness fault.
const FATAL_EXIT_CODE: i32 = 86;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to BUILD_ADMIN_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting build admin");
    info!(
        listen_addr = %config.listen_addr,
        store_root = %config.store_root.display(),
        catalog = config.catalog.is_some(),
        "Configuration loaded"
    );

    metrics::init_metrics()?;

    let meta_store: Arc<dyn CoordinationStore> = Arc::new(FsStore::new(config.store_root.clone()));
    let index_store: Arc<dyn CoordinationStore> = Arc::new(FsStore::new(config.index_root.clone()));

    let scheduler: Arc<dyn WorkerScheduler> = match &config.scheduler_url {
        Some(url) => Arc::new(HttpWorkerScheduler::new(url.as_str())?),
        None => {
            warn!("No worker scheduler configured; plans are only recorded");
            Arc::new(RecordingScheduler::new())
        }
    };

    let id_map = Arc::new(CatalogIdMap::new());
    let base_factory = Arc::new(StoreGenerationFactory::new(
        meta_store.clone(),
        index_store.clone(),
    ));
    let factory: Arc<dyn JobFactory> = if config.catalog.is_some() {
        Arc::new(CatalogAwareFactory::new(base_factory, id_map.clone()))
    } else {
        base_factory
    };

    let orchestrator = Arc::new(FleetOrchestrator::new(
        config.orchestrator.clone(),
        config.recovery.clone(),
        meta_store.clone(),
        factory,
        scheduler,
        Arc::new(ProhibitedHostSet::new(&config.prohibited_hosts)),
    ));
    let collector = Arc::new(ObsoleteDataCollector::new(
        config.gc.clone(),
        orchestrator.registry().clone(),
        meta_store.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fault_tx, mut fault_rx) = mpsc::channel(1);

    // Serve /readyz (503) and diagnostics while recovery runs.
    let app = api::create_router(AppState::new(orchestrator.clone(), collector.clone()));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    loop {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    if let Err(e) = orchestrator.recover().await {
        error!(error = %e, "Recovery failed");
        return Err(e.into());
    }

    let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let schedule_worker = ScheduleWorker::new(orchestrator.clone());
    let schedule_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { schedule_worker.run(shutdown_rx).await }
    });
    workers.push(("schedule", schedule_handle));

    let monitor = LivenessMonitor::new(config.liveness.clone(), orchestrator.clone());
    let liveness_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { monitor.run(fault_tx, shutdown_rx).await }
    });
    workers.push(("liveness", liveness_handle));

    let gc_worker = GcWorker::new(collector.clone());
    let gc_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { gc_worker.run(shutdown_rx).await }
    });
    workers.push(("gc", gc_handle));

    let deletion_handle = tokio::spawn({
        let deletions = collector.deletions().clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { deletions.run(shutdown_rx).await }
    });
    workers.push(("deferred-deletion", deletion_handle));

    if let Some(catalog) = &config.catalog {
        let client = Arc::new(HttpCatalogClient::new(catalog.url.as_str())?);
        let reconciler = Arc::new(CatalogReconciler::new(orchestrator.clone(), client, id_map));
        let catalog_worker = CatalogWorker::new(reconciler, catalog.sync_interval);
        let catalog_handle = tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { catalog_worker.run(shutdown_rx).await }
        });
        workers.push(("catalog", catalog_handle));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(fault) = fault_rx.recv() => {
            error!(
                fault = %fault,
                exit_code = FATAL_EXIT_CODE,
                "Fatal liveness fault; terminating"
            );
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();
            std::process::exit(FATAL_EXIT_CODE);
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);
    for (name, handle) in workers {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!(worker = name, "Worker did not shut down in time");
        }
    }
    if !server_handle.is_finished()
        && tokio::time::timeout(shutdown_timeout, server_handle).await.is_err()
    {
        warn!("HTTP server did not shut down in time");
    }

    info!("Build admin shutdown complete");
    Ok(())
}
