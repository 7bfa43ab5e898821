//! # followgraph-events
//!
//! Consumes user lifecycle events from a durable AMQP queue bound to a fanout
//! exchange and materializes them as user nodes in a [`GraphStore`].
//!
//! ```text
//!  identity service --publish--> user-events-exchange (fanout)
//!                                        |
//!                                        v
//!                          followers-user-events-queue
//!                                        |  manual ack
//!                                        v
//!                                +---------------+
//!                                | EventConsumer | ---> GraphStore (nodes)
//!                                +---------------+
//! ```
//!
//! ## Routing
//!
//! | Routing key    | Mutation                        |
//! |----------------|---------------------------------|
//! | `user.created` | `upsert_node` (idempotent)      |
//! | `user.deleted` | `delete_node` (cascades edges)  |
//! | anything else  | none, acknowledged              |
//!
//! ## Settlement
//!
//! Malformed bodies are rejected without requeue. A store failure is requeued
//! up to [`RetryPolicy::max_attempts`] times, then rejected without requeue so
//! the broker routes it to the dead-letter exchange. Only a successful
//! mutation is acknowledged.
//!
//! [`GraphStore`]: followgraph_core::GraphStore

pub mod amqp;
pub mod consumer;
pub mod error;
pub mod event;

pub use amqp::{AmqpConfig, DeadLetterConfig};
pub use consumer::{
    ConsumeExit, ConsumerState, ConsumerStats, Delivery, Disposition, EventConsumer, RetryPolicy,
};
pub use error::EventError;
pub use event::{EventKind, LifecycleEvent, USER_CREATED, USER_DELETED};
