use followgraph_core::{parse_user_id, UserId};

use crate::error::EventError;

pub const USER_CREATED: &str = "user.created";
pub const USER_DELETED: &str = "user.deleted";

/// Routing classification carried as the message routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Deleted,
    /// Any other routing key. Acknowledged without touching the graph.
    Unrecognized,
}

impl EventKind {
    pub fn from_routing_key(key: &str) -> Self {
        match key {
            USER_CREATED => EventKind::Created,
            USER_DELETED => EventKind::Deleted,
            _ => EventKind::Unrecognized,
        }
    }

    pub fn routing_key(&self) -> Option<&'static str> {
        match self {
            EventKind::Created => Some(USER_CREATED),
            EventKind::Deleted => Some(USER_DELETED),
            EventKind::Unrecognized => None,
        }
    }
}

/// A user lifecycle event as published by the identity service.
///
/// The body is the user id in decimal ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub user_id: UserId,
}

impl LifecycleEvent {
    /// The body is decoded before the routing key is looked at, so a
    /// malformed body is rejected whatever its classification.
    pub fn decode(routing_key: &str, body: &[u8]) -> Result<Self, EventError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| EventError::Malformed(format!("body is not UTF-8 ({} bytes)", body.len())))?;
        let user_id = parse_user_id(text).map_err(|e| EventError::Malformed(e.to_string()))?;

        Ok(Self {
            kind: EventKind::from_routing_key(routing_key),
            user_id,
        })
    }
}
