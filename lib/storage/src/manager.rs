use async_trait::async_trait;
use followgraph_core::{EdgeOutcome, Error, GraphStore, Result, UserId};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use crate::lmdb_storage::LmdbGraph;

/// Settings for the on-disk graph
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub map_size: usize,
    /// Upper bound on a single store operation
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            map_size: 1024 * 1024 * 1024,
            op_timeout: Duration::from_secs(5),
        }
    }
}

/// Process-wide owner of the LMDB environment.
///
/// Opened once at startup and closed once at shutdown. Each store call gets
/// its own transaction on the blocking pool; the environment handle is the
/// only thing shared between concurrent calls.
pub struct StorageManager {
    graph: RwLock<Option<Arc<LmdbGraph>>>,
    config: StoreConfig,
}

impl StorageManager {
    pub fn open(config: StoreConfig) -> Result<Self> {
        if config.op_timeout.is_zero() {
            return Err(Error::InvalidConfig("store operation timeout must be non-zero".into()));
        }
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join("graph");
        let graph = LmdbGraph::open(&path, config.map_size)
            .map_err(|e| Error::Storage(e.to_string()))?;
        info!(path = ?path, "graph store opened");

        Ok(Self {
            graph: RwLock::new(Some(Arc::new(graph))),
            config,
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.graph.read().is_some()
    }

    /// Release the environment. Later calls fail with a storage error.
    ///
    /// Does not wait for in-flight operations: if any still hold the
    /// environment, the last of them releases it when it finishes.
    pub fn close(&self) {
        let Some(graph) = self.graph.write().take() else {
            return;
        };
        match Arc::try_unwrap(graph) {
            Ok(graph) => {
                graph.close();
                info!("graph store closed");
            }
            // The last in-flight operation drops the environment when it finishes.
            Err(_) => warn!("graph store closed with operations still in flight"),
        }
    }

    pub async fn node_count(&self) -> Result<u64> {
        self.run("node_count", |g| g.node_count()).await
    }

    pub async fn edge_count(&self) -> Result<u64> {
        self.run("edge_count", |g| g.edge_count()).await
    }

    pub async fn followers(&self, user: UserId) -> Result<Vec<UserId>> {
        self.run("followers", move |g| g.followers(user)).await
    }

    fn graph(&self) -> Result<Arc<LmdbGraph>> {
        self.graph
            .read()
            .clone()
            .ok_or_else(|| Error::Storage("graph store is closed".into()))
    }

    /// Run `op` on the blocking pool, bounded by the configured timeout.
    ///
    /// On timeout the transaction may still commit after the caller has seen
    /// [`Error::Timeout`]; every write is idempotent, so a retry converges.
    async fn run<T, F>(&self, name: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbGraph) -> anyhow::Result<T> + Send + 'static,
    {
        let graph = self.graph()?;
        let timeout = self.config.op_timeout;
        let task = tokio::task::spawn_blocking(move || op(&graph));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => {
                warn!(op = name, error = %e, "store operation failed");
                Err(Error::Storage(format!("{name}: {e}")))
            }
            Ok(Err(join)) => Err(Error::Storage(format!("{name} task failed: {join}"))),
            Err(_) => {
                warn!(op = name, ?timeout, "store operation timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl GraphStore for StorageManager {
    async fn node_exists(&self, user: UserId) -> Result<bool> {
        self.run("node_exists", move |g| g.node_exists(user)).await
    }

    async fn upsert_node(&self, user: UserId) -> Result<()> {
        self.run("upsert_node", move |g| g.upsert_node(user)).await
    }

    async fn delete_node(&self, user: UserId) -> Result<()> {
        self.run("delete_node", move |g| g.delete_node(user).map(|_| ())).await
    }

    async fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome> {
        self.run("upsert_edge", move |g| g.upsert_edge(follower, followed)).await
    }

    async fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool> {
        self.run("edge_exists", move |g| g.edge_exists(follower, followed)).await
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.close();
    }
}
