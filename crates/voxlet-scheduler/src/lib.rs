//! voxlet-scheduler: Job queue, registry, and dispatch
//!
//! Jobs enter through [`JobDispatcher::submit`], wait in an inbound queue,
//! and are executed by a worker pool that binds each job to a node and its
//! exclusive execution slot.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{JobDispatcher, JobHandle};
pub use registry::JobRegistry;
