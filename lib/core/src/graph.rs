// Follower graph model - user nodes and directed follow edges
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Identifier asserted by the identity service. Never generated here.
pub type UserId = i64;

/// Parse a decimal user identifier.
///
/// Surrounding ASCII whitespace is ignored so that publishers appending a
/// newline to the body are still understood. Anything else that is not a
/// base-10 `i64` is rejected.
pub fn parse_user_id(raw: &str) -> Result<UserId> {
    raw.trim()
        .parse::<UserId>()
        .map_err(|_| Error::InvalidUserId(raw.to_string()))
}

/// A directed follows relationship. Carries no attributes beyond its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower: UserId,
    pub followed: UserId,
}

impl FollowEdge {
    #[inline]
    #[must_use]
    pub fn new(follower: UserId, followed: UserId) -> Self {
        Self { follower, followed }
    }

    #[inline]
    #[must_use]
    pub fn is_self_follow(&self) -> bool {
        self.follower == self.followed
    }

    /// Returns true if `user` is either endpoint.
    #[inline]
    #[must_use]
    pub fn touches(&self, user: UserId) -> bool {
        self.follower == user || self.followed == user
    }
}

/// The accepted relationship as returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub follower_id: UserId,
    pub followed_user_id: UserId,
}

impl From<FollowEdge> for Relationship {
    fn from(edge: FollowEdge) -> Self {
        Self {
            follower_id: edge.follower,
            followed_user_id: edge.followed,
        }
    }
}

impl From<Relationship> for FollowEdge {
    fn from(rel: Relationship) -> Self {
        Self {
            follower: rel.follower_id,
            followed: rel.followed_user_id,
        }
    }
}

/// Result of an atomic match-both-then-merge edge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    Created,
    AlreadyExists,
    /// The follower node was absent when the write ran; nothing was written.
    MissingFollower,
    /// The followed node was absent when the write ran; nothing was written.
    MissingFollowed,
}

impl EdgeOutcome {
    #[inline]
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, EdgeOutcome::Created | EdgeOutcome::AlreadyExists)
    }
}
