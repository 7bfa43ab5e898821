//! # followgraph Core
//!
//! Core library for the followgraph service.
//!
//! This crate provides the model and the protocols that do not depend on a
//! particular backend or transport:
//!
//! - [`UserId`], [`FollowEdge`], [`Relationship`] - the follower graph model
//! - [`GraphStore`] - idempotent node/edge primitives, each one atomic
//! - [`MemoryGraphStore`] - in-process store
//! - [`RelationshipService`] - existence-checked follow creation
//! - [`Shutdown`] - cooperative stop signal for background loops
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use followgraph_core::{GraphStore, MemoryGraphStore, RelationshipService};
//!
//! # tokio_test_block(async {
//! let store = Arc::new(MemoryGraphStore::new());
//! store.upsert_node(1).await.unwrap();
//! store.upsert_node(2).await.unwrap();
//!
//! let service = RelationshipService::new(store);
//! let rel = service.create_follow(1, 2).await.unwrap();
//! assert_eq!(rel.follower_id, 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod store;
pub mod memory;
pub mod relationship;
pub mod shutdown;

pub use error::{Error, FollowError, Result};
pub use graph::{parse_user_id, EdgeOutcome, FollowEdge, Relationship, UserId};
pub use store::GraphStore;
pub use memory::MemoryGraphStore;
pub use relationship::RelationshipService;
pub use shutdown::{Shutdown, ShutdownSignal};
