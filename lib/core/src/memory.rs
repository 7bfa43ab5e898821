use crate::graph::{EdgeOutcome, FollowEdge, UserId};
use crate::store::GraphStore;
use crate::Result;
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
struct Adjacency {
    nodes: AHashSet<UserId>,
    following: AHashMap<UserId, AHashSet<UserId>>,
    followers: AHashMap<UserId, AHashSet<UserId>>,
}

/// In-process graph store. Each operation holds the lock for its whole body,
/// so the match-then-merge in [`GraphStore::upsert_edge`] is atomic.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Adjacency>,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().following.values().map(|targets| targets.len()).sum()
    }

    /// All edges, sorted by (follower, followed).
    #[must_use]
    pub fn edges(&self) -> Vec<FollowEdge> {
        let inner = self.inner.read();
        let mut edges: Vec<FollowEdge> = inner
            .following
            .iter()
            .flat_map(|(&follower, targets)| {
                targets.iter().map(move |&followed| FollowEdge::new(follower, followed))
            })
            .collect();
        edges.sort_by_key(|e| (e.follower, e.followed));
        edges
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn node_exists(&self, user: UserId) -> Result<bool> {
        Ok(self.inner.read().nodes.contains(&user))
    }

    async fn upsert_node(&self, user: UserId) -> Result<()> {
        self.inner.write().nodes.insert(user);
        Ok(())
    }

    async fn delete_node(&self, user: UserId) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.nodes.remove(&user) {
            return Ok(());
        }

        if let Some(targets) = inner.following.remove(&user) {
            for followed in targets {
                if let Some(set) = inner.followers.get_mut(&followed) {
                    set.remove(&user);
                }
            }
        }
        if let Some(sources) = inner.followers.remove(&user) {
            for follower in sources {
                if let Some(set) = inner.following.get_mut(&follower) {
                    set.remove(&user);
                }
            }
        }
        Ok(())
    }

    async fn upsert_edge(&self, follower: UserId, followed: UserId) -> Result<EdgeOutcome> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains(&follower) {
            return Ok(EdgeOutcome::MissingFollower);
        }
        if !inner.nodes.contains(&followed) {
            return Ok(EdgeOutcome::MissingFollowed);
        }

        let created = inner.following.entry(follower).or_default().insert(followed);
        inner.followers.entry(followed).or_default().insert(follower);
        Ok(if created {
            EdgeOutcome::Created
        } else {
            EdgeOutcome::AlreadyExists
        })
    }

    async fn edge_exists(&self, follower: UserId, followed: UserId) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .following
            .get(&follower)
            .is_some_and(|targets| targets.contains(&followed)))
    }
}
