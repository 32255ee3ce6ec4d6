//! voxlet-api: REST surfaces for voxlet
//!
//! Two routers live here:
//! - the control plane (job submission, job and node listings), served by
//!   the coordinator process
//! - the node-side surface (health contract, synthesis/transcription
//!   routes), served on the GPU node itself

pub mod node;
pub mod rest;

pub use node::create_node_router;
pub use rest::create_router;
