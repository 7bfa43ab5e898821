use crate::graph::{EdgeOutcome, UserId};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Idempotent node/edge primitives over a durable property graph.
///
/// Every method is a single atomic unit. Implementations bound each call by
/// an execution timeout and report it as [`crate::Error::Timeout`].
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Read-only existence check.
    async fn node_exists(&self, user: UserId) -> Result<bool>;

    /// Create the node if absent. Never fails on "already exists".
    async fn upsert_node(&self, user: UserId) -> Result<()>;

    /// Remove the node and every edge incident to it. Absent nodes succeed.
    async fn delete_node(&self, user: UserId) -> Result<()>;

    /// Re-match both endpoints and merge the directed edge in one unit.
    ///
    /// If either endpoint is missing at write time nothing is written and the
    /// corresponding `Missing*` outcome is returned.
    async fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome>;

    async fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool>;
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStore for Arc<S> {
    async fn node_exists(&self, user: UserId) -> Result<bool> {
        (**self).node_exists(user).await
    }

    async fn upsert_node(&self, user: UserId) -> Result<()> {
        (**self).upsert_node(user).await
    }

    async fn delete_node(&self, user: UserId) -> Result<()> {
        (**self).delete_node(user).await
    }

    async fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome> {
        (**self).upsert_edge(follower, followed).await
    }

    async fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool> {
        (**self).edge_exists(follower, followed).await
    }
}
