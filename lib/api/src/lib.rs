//! HTTP surface and service registration for followgraph.
//!
//! - [`RestApi`] serves the follow endpoints over actix-web
//! - [`EurekaClient`] announces the instance to a Eureka-compatible registry

pub mod discovery;
pub mod rest;

pub use discovery::{run_heartbeat, DiscoveryError, EurekaClient, Registry, RegistryConfig};
pub use rest::{RestApi, ServerConfig};
