use std::sync::Arc;
use std::time::Duration;

use batchforge_core::config::SchedulerConfig;
use batchforge_core::ports::{QueueLoadStore, TaskQueue};
use batchforge_core::unit_worker::UnitWorker;
use batchforge_db::stores::{PgCreditLedger, PgJobStore, PgQueueLoadStore, PgTaskQueue};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchforge_worker::config::WorkerConfig;
use batchforge_worker::reaper;
use batchforge_worker::runtime::WorkerRuntime;
use batchforge_worker::synthesis::HttpSynthesizer;

/// Grace period for in-flight units after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "batchforge_worker=debug,batchforge_core=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let scheduler = SchedulerConfig::from_env().expect("Invalid scheduler configuration");
    let config = WorkerConfig::from_env(&scheduler).expect("Invalid worker configuration");
    tracing::info!(
        worker = %config.name,
        concurrency = config.concurrency,
        synthesis_url = %config.synthesis_url,
        "Loaded worker configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = batchforge_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    batchforge_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database connection pool created");

    // --- Stores ---
    let queue_loads = PgQueueLoadStore::new(pool.clone());
    queue_loads
        .ensure_queues(&scheduler.queues())
        .await
        .expect("Failed to seed queue counters");
    let queue_loads: Arc<dyn QueueLoadStore> = Arc::new(queue_loads);
    let tasks: Arc<dyn TaskQueue> = Arc::new(PgTaskQueue::new(pool.clone()));

    let synthesizer = HttpSynthesizer::new(&config.synthesis_url, config.synthesis_timeout)
        .expect("Failed to build synthesis client");

    let worker = UnitWorker::new(
        Arc::new(PgJobStore::new(pool.clone())),
        queue_loads.clone(),
        Arc::new(PgCreditLedger::new(pool.clone())),
        Arc::new(synthesizer),
    );
    let runtime = WorkerRuntime::new(
        worker,
        tasks.clone(),
        scheduler.retry.clone(),
        config.queues.clone(),
        config.name.clone(),
        config.poll_interval,
    );

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let reaper_handle = tokio::spawn(reaper::run(
        tasks,
        queue_loads,
        config.claim_timeout,
        cancel.clone(),
    ));
    let runtime_handle = tokio::spawn(runtime.run(config.concurrency, cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    // --- Drain ---
    tracing::info!("Waiting for in-flight units to settle");
    if tokio::time::timeout(SHUTDOWN_GRACE, runtime_handle).await.is_err() {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight units did not settle in time; the reaper will redeliver them"
        );
    }
    let _ = reaper_handle.await;

    pool.close().await;
    tracing::info!("Worker shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
