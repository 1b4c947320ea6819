use std::str::FromStr;
use std::sync::Arc;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use uptime_agent::collector::Collector;
use uptime_agent::config::{BackendMode, RuntimeConfig};
use uptime_agent::config_loader::{api::ApiConfigLoader, db::DbConfigLoader, ConfigLoader};
use uptime_agent::delivery::Delivery;
use uptime_agent::health::Readiness;
use uptime_agent::leader::{api::ApiLeaseProvider, db::DbLeaseProvider, LeaseProvider};
use uptime_agent::probe::HttpProbeExecutor;
use uptime_agent::queue::{BatchBuffer, OverflowQueue, DEFAULT_BATCH_CAPACITY, DEFAULT_MAX_QUEUE_SIZE};
use uptime_agent::sink::{api::ApiSink, db::DbSink, Sink};

const CONTROL_PLANE_HTTP_TIMEOUT_SECS: u64 = 30;
const DB_POOL_MAX_SIZE: usize = 16;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let early_log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    uptime_agent::logging::init(&early_log_level);

    let runtime_config = match RuntimeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "fatal bootstrap error, exiting");
            std::process::exit(1);
        }
    };

    let agent_id = runtime_config.agent_id;
    // Ready until proven otherwise: no config load has been attempted yet, and
    // /readyz should say so rather than report unready before bootstrap even runs.
    let readiness = Readiness::new(true);

    let queue_path = OverflowQueue::path_for_agent(&runtime_config.queue_path, agent_id);
    let queue = Arc::new(OverflowQueue::new(queue_path, DEFAULT_MAX_QUEUE_SIZE));
    queue.load_from_disk().await;

    let (loader, sink, lease): (Arc<dyn ConfigLoader>, Arc<dyn Sink>, Arc<dyn LeaseProvider>) =
        match &runtime_config.backend {
            BackendMode::Database { conn_string } => {
                let pool = match build_postgres_pool(conn_string) {
                    Ok(pool) => pool,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build database pool, exiting");
                        std::process::exit(1);
                    }
                };
                (
                    Arc::new(DbConfigLoader::new(pool.clone())),
                    Arc::new(DbSink::new(pool.clone())),
                    Arc::new(DbLeaseProvider::new(pool)),
                )
            }
            BackendMode::Api { base_url, api_key } => {
                let client = match reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(CONTROL_PLANE_HTTP_TIMEOUT_SECS))
                    .build()
                {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build HTTP client, exiting");
                        std::process::exit(1);
                    }
                };
                (
                    Arc::new(ApiConfigLoader::new(client.clone(), base_url.clone(), api_key.clone(), agent_id)),
                    Arc::new(ApiSink::new(client.clone(), base_url.clone(), api_key.clone())),
                    Arc::new(ApiLeaseProvider::new(client, base_url.clone(), api_key.clone())),
                )
            }
        };

    let delivery = match &runtime_config.backend {
        BackendMode::Database { .. } => Arc::new(Delivery::direct(sink, Arc::clone(&queue))),
        BackendMode::Api { .. } => {
            let batch = Arc::new(BatchBuffer::new(DEFAULT_BATCH_CAPACITY));
            Arc::new(Delivery::batched(sink, Arc::clone(&queue), batch))
        }
    };

    let executor = Arc::new(HttpProbeExecutor::production());
    let collector = Arc::new(Collector::new(delivery, executor));

    uptime_agent::control_loop::run(runtime_config, loader, lease, collector, readiness).await;
}

fn build_postgres_pool(conn_string: &str) -> Result<Pool, Box<dyn std::error::Error>> {
    let pg_config = tokio_postgres::Config::from_str(conn_string)?;
    let manager_config = ManagerConfig { recycling_method: RecyclingMethod::Fast };
    let manager = Manager::from_config(pg_config, tokio_postgres::NoTls, manager_config);
    let pool = Pool::builder(manager).max_size(DB_POOL_MAX_SIZE).build()?;
    Ok(pool)
}
