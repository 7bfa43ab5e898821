use crate::graph::UserId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Graph store and infrastructure failures.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Timeout(_) | Error::Io(_))
    }
}

/// Outcome of a follow request that did not produce a relationship.
#[derive(Error, Debug)]
pub enum FollowError {
    #[error("Follower user {0} does not exist")]
    FollowerNotFound(UserId),

    #[error("Followed user {0} does not exist")]
    FollowedNotFound(UserId),

    #[error("Store failure: {0}")]
    Store(#[from] Error),
}

impl FollowError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FollowError::FollowerNotFound(_) | FollowError::FollowedNotFound(_))
    }
}
