//! Node server

use std::future::Future;
use std::sync::Arc;

use crate::cluster::ShardRouter;
use crate::common::{NodeConfig, Result, Storage};
use crate::coordinator::dispatch::Dispatcher;
use crate::coordinator::http::{create_router, NodeState};
use crate::coordinator::pool::WorkerPool;
use crate::coordinator::replica::{HttpReplicaClient, LocalReplica};
use crate::inspector::{self, StatsSource};

pub struct Node {
    config: NodeConfig,
}

/// Statistics the inspector samples from a running node
struct NodeStats {
    storage: Storage,
    pool: Arc<WorkerPool>,
}

impl StatsSource for NodeStats {
    fn key_count(&self) -> u64 {
        self.storage.approximate_len().unwrap_or(0)
    }

    fn task_count(&self) -> u64 {
        self.pool.queued() as u64
    }
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Bind `bind_addr` and serve until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C.
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> Result<()> {
        self.serve_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve_until<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.config;
        config.validate()?;

        tracing::info!("Starting node: {}", config.self_url);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Storage: {} at {}", config.storage, config.data_dir.display());
        tracing::info!("  Cluster: {} nodes", config.cluster_urls.len());

        let router = Arc::new(ShardRouter::build(config.cluster_urls.clone())?);
        let storage = Storage::open(config.storage, config.data_dir.join("entities"))?;
        let local = Arc::new(LocalReplica::new(storage.clone()));
        let pool = Arc::new(WorkerPool::new(config.workers, config.queue_capacity));
        let remote = Arc::new(HttpReplicaClient::new(config.replica_timeout())?);

        let dispatcher = Arc::new(Dispatcher::new(
            config.self_url.clone(),
            local.clone(),
            remote,
            pool.clone(),
            config.replica_timeout(),
        ));

        let inspector = inspector::build(&config, router.clone())?;
        inspector.set_data(Arc::new(NodeStats {
            storage,
            pool: pool.clone(),
        }));
        if config.inspector.enabled {
            inspector.start();
        }

        let app = create_router(NodeState {
            router,
            dispatcher,
            local,
            inspector: inspector.clone(),
        });

        tracing::info!("✓ Node ready");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        inspector.stop();
        pool.shutdown();
        tracing::info!("Node {} stopped", config.self_url);

        Ok(result?)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
