use std::net::SocketAddr;
use std::sync::Arc;

use batchforge_core::config::SchedulerConfig;
use batchforge_core::dispatcher::JobDispatcher;
use batchforge_db::stores::{PgJobStore, PgQueueLoadStore, PgTaskQueue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchforge_api::config::ServerConfig;
use batchforge_api::router::build_app_router;
use batchforge_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "batchforge_api=debug,batchforge_core=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Loaded server configuration",
    );

    let scheduler = SchedulerConfig::from_env().expect("Invalid scheduler configuration");
    tracing::info!(
        queue_count = scheduler.queue_count,
        max_active_jobs_per_owner = scheduler.max_active_jobs_per_owner,
        "Loaded scheduler configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = batchforge_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    batchforge_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    batchforge_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    batchforge_db::ensure_unit_uniqueness(&pool)
        .await
        .expect("Failed to ensure artifact uniqueness index");

    // --- Stores ---
    let queue_loads = PgQueueLoadStore::new(pool.clone());
    queue_loads
        .ensure_queues(&scheduler.queues())
        .await
        .expect("Failed to seed queue counters");

    let dispatcher = JobDispatcher::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool.clone())),
        Arc::new(queue_loads),
        scheduler,
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, closing pool");
    if tokio::time::timeout(config.shutdown_timeout, pool.close()).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Pool close timed out"
        );
    }
    tracing::info!("Graceful shutdown complete");
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
