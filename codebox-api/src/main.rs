use anyhow::Result;
use codebox_api::create_app;
use codebox_core::Config;
use codebox_orchestrator::{scheduler, JobContext, Scheduler};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("codebox_api=debug,codebox_orchestrator=debug,tower_http=debug")
        .init();

    info!("Starting codebox-api service...");

    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    let pool = codebox_db::create_pool(&config.db_path).await?;
    info!("Running database migrations...");
    codebox_db::run_migrations(&pool).await?;
    info!("Migrations complete");

    let scheduler = Scheduler::new(JobContext::new(pool.clone(), &config), &config);
    tokio::spawn(scheduler.run());

    tokio::spawn(scheduler::run_ticker(
        pool.clone(),
        Duration::from_secs(config.ping_interval_secs),
    ));
    info!(
        "Job workers and health ticker started (ping interval: {}s)",
        config.ping_interval_secs
    );

    let bind_addr = config.bind_addr.clone();
    let app = create_app(pool, config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{bind_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
