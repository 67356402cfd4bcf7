use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use minirag_server::api;
use minirag_server::config::AppConfig;
use minirag_server::llm::{embedding_dimensions, ProviderRegistry};
use minirag_server::queue::JobQueue;
use minirag_server::shared::state::AppState;
use minirag_server::shared::utils::{create_pool, run_migrations};
use minirag_server::vector_db::VectorStore;
use minirag_server::workers;

/// Refresh scheduler cadence
const REFRESH_TICK: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    info!(
        "Starting minirag-server {} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );

    let pool = create_pool(&config.database_url)?;
    run_migrations(&pool).map_err(|e| format!("migrations failed: {}", e))?;
    info!("Database migrations applied");

    let queue_pool = if config.queue_url == config.database_url {
        pool.clone()
    } else {
        create_pool(&config.queue_url)?
    };

    let vector = VectorStore::new(&config.vector_url);
    let dims = embedding_dimensions(&config.llm.default_embedding_model);
    if let Err(e) = vector.ensure_collection(dims).await {
        // The worker retries per job; the server can come up without the
        // vector store being reachable yet.
        error!("vector collection setup failed: {}", e);
    }

    let llm = Arc::new(ProviderRegistry::from_config(&config.llm));
    let queue = Arc::new(JobQueue::new(
        queue_pool,
        Duration::from_secs(config.worker.poll_interval_secs),
        config.worker.concurrency,
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, pool, vector, llm, Arc::clone(&queue)));

    workers::register_handlers(&queue).await;
    queue.register_cron(workers::REFRESH_JOB, serde_json::json!({}), REFRESH_TICK);
    Arc::clone(&queue).start(Arc::clone(&state));

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
