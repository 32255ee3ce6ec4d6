//! voxlet-core: Core types and traits for the voxlet coordinator
//!
//! This crate provides the fundamental types used throughout the voxlet system:
//! - Artifact specifications and provisioning outcomes
//! - Node, job, and lease types
//! - Readiness state and the health report shape
//! - Configuration types
//! - Error handling
//! - Retry with exponential backoff

pub mod artifact;
pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod node;
pub mod readiness;
pub mod retry;

pub use artifact::*;
pub use config::*;
pub use error::*;
pub use job::*;
pub use node::*;
pub use readiness::*;
pub use retry::*;
