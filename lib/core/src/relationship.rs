use crate::graph::{EdgeOutcome, FollowEdge, Relationship, UserId};
use crate::store::GraphStore;
use crate::FollowError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validates that both endpoints exist, then commits the follow edge.
///
/// Holds nothing but the store handle, so one instance can serve any number
/// of concurrent requests.
#[derive(Clone)]
pub struct RelationshipService {
    store: Arc<dyn GraphStore>,
}

impl RelationshipService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Create `follower -> followed`. Repeating the call returns the same
    /// relationship without creating a second edge.
    ///
    /// Self-follow is accepted.
    pub async fn create_follow(
        &self,
        follower: UserId,
        followed: UserId,
    ) -> Result<Relationship, FollowError> {
        let (follower_exists, followed_exists) = tokio::join!(
            self.store.node_exists(follower),
            self.store.node_exists(followed),
        );

        let follower_exists = follower_exists.map_err(|e| {
            warn!(follower, error = %e, "existence check failed");
            FollowError::Store(e)
        })?;
        let followed_exists = followed_exists.map_err(|e| {
            warn!(followed, error = %e, "existence check failed");
            FollowError::Store(e)
        })?;

        if !follower_exists {
            return Err(FollowError::FollowerNotFound(follower));
        }
        if !followed_exists {
            return Err(FollowError::FollowedNotFound(followed));
        }

        // The store re-matches both nodes; one may have been deleted since the check.
        let outcome = self.store.upsert_edge(follower, followed).await.map_err(|e| {
            warn!(follower, followed, error = %e, "edge write failed");
            FollowError::Store(e)
        })?;

        match outcome {
            EdgeOutcome::Created | EdgeOutcome::AlreadyExists => {
                debug!(follower, followed, ?outcome, "follow committed");
                Ok(FollowEdge::new(follower, followed).into())
            }
            EdgeOutcome::MissingFollower => Err(FollowError::FollowerNotFound(follower)),
            EdgeOutcome::MissingFollowed => Err(FollowError::FollowedNotFound(followed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, MemoryGraphStore, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    async fn service_with(nodes: &[UserId]) -> (RelationshipService, Arc<MemoryGraphStore>) {
        let store = Arc::new(MemoryGraphStore::new());
        for &id in nodes {
            store.upsert_node(id).await.unwrap();
        }
        (RelationshipService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_follow_idempotent() {
        let (service, store) = service_with(&[1, 2]).await;

        let first = service.create_follow(1, 2).await.unwrap();
        let second = service.create_follow(1, 2).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.follower_id, 1);
        assert_eq!(first.followed_user_id, 2);
        assert_eq!(store.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_follower_is_not_found() {
        let (service, store) = service_with(&[2]).await;

        let err = service.create_follow(1, 2).await.unwrap_err();
        assert!(matches!(err, FollowError::FollowerNotFound(1)));
        assert!(err.is_not_found());
        assert_eq!(store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_followed_is_not_found() {
        let (service, _) = service_with(&[1]).await;
        let err = service.create_follow(1, 2).await.unwrap_err();
        assert!(matches!(err, FollowError::FollowedNotFound(2)));
    }

    #[tokio::test]
    async fn test_follower_reported_before_followed() {
        let (service, _) = service_with(&[]).await;
        let err = service.create_follow(1, 2).await.unwrap_err();
        assert!(matches!(err, FollowError::FollowerNotFound(1)));
    }

    #[tokio::test]
    async fn test_self_follow_allowed() {
        let (service, store) = service_with(&[5]).await;
        let rel = service.create_follow(5, 5).await.unwrap();
        assert_eq!(rel.follower_id, rel.followed_user_id);
        assert!(store.edge_exists(5, 5).await.unwrap());
    }

    /// Reports both nodes present but deletes the follower before the write.
    struct DeletedBetween {
        inner: MemoryGraphStore,
    }

    #[async_trait]
    impl GraphStore for DeletedBetween {
        async fn node_exists(&self, _user: UserId) -> Result<bool> {
            Ok(true)
        }
        async fn upsert_node(&self, user: UserId) -> Result<()> {
            self.inner.upsert_node(user).await
        }
        async fn delete_node(&self, user: UserId) -> Result<()> {
            self.inner.delete_node(user).await
        }
        async fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome> {
            self.inner.delete_node(follower).await?;
            self.inner.upsert_edge(follower, followed).await
        }
        async fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool> {
            self.inner.edge_exists(follower, followed).await
        }
    }

    #[tokio::test]
    async fn test_delete_between_check_and_write() {
        let store = Arc::new(DeletedBetween { inner: MemoryGraphStore::new() });
        store.upsert_node(1).await.unwrap();
        store.upsert_node(2).await.unwrap();
        let service = RelationshipService::new(store.clone());

        let err = service.create_follow(1, 2).await.unwrap_err();
        assert!(matches!(err, FollowError::FollowerNotFound(1)));
        assert_eq!(store.inner.edge_count(), 0);
    }

    struct Unavailable;

    #[async_trait]
    impl GraphStore for Unavailable {
        async fn node_exists(&self, _user: UserId) -> Result<bool> {
            Err(Error::Timeout(Duration::from_secs(5)))
        }
        async fn upsert_node(&self, _user: UserId) -> Result<()> {
            Err(Error::Storage("down".into()))
        }
        async fn delete_node(&self, _user: UserId) -> Result<()> {
            Err(Error::Storage("down".into()))
        }
        async fn upsert_edge(&self, _f: UserId, _t: UserId) -> Result<EdgeOutcome> {
            Err(Error::Storage("down".into()))
        }
        async fn edge_exists(&self, _f: UserId, _t: UserId) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let service = RelationshipService::new(Arc::new(Unavailable));
        let err = service.create_follow(1, 2).await.unwrap_err();
        assert!(matches!(err, FollowError::Store(Error::Timeout(_))));
        assert!(!err.is_not_found());
    }
}
