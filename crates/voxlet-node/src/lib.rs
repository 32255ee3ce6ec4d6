//! voxlet-node: Acquisition, readiness, exclusivity, and release of the
//! remote GPU node
//!
//! The node is ephemeral and billed; the coordinator owns every state
//! transition, reuses a live node instead of provisioning duplicates, stops
//! nodes after an idle timeout, and always reattaches the same persistent
//! volume so cached artifacts survive stop/start cycles.

pub mod client;
pub mod coordinator;
pub mod health;
pub mod provider;
pub mod rest;
pub mod slot;

pub use client::{HttpInferenceClient, InferenceClient};
pub use coordinator::{NodeCoordinator, NodeHandle};
pub use health::{HttpNodeHealth, NodeHealth};
pub use provider::{LaunchedInstance, NodeProvider};
pub use rest::RestProvider;
pub use slot::ExecutionSlot;
