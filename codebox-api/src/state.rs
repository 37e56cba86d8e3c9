use codebox_core::Config;
use codebox_db::WorkspaceLogStore;
use codebox_runner::PortBroker;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub broker: Arc<PortBroker>,
    pub logs: WorkspaceLogStore,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let broker = Arc::new(PortBroker::new(
            pool.clone(),
            config.tunnel_port_min..=config.tunnel_port_max,
        ));
        let logs = WorkspaceLogStore::new(config.data_path.join("logs"));

        Self {
            pool,
            config: Arc::new(config),
            broker,
            logs,
            started_at: Instant::now(),
        }
    }
}
