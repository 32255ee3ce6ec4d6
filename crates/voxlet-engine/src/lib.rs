//! voxlet-engine: Inference collaborator seams and the readiness sequencer
//!
//! The inference models themselves live outside this system; this crate
//! defines the trait they are invoked through, a process-spawning
//! implementation that drives external model runners, and the startup state
//! machine gating traffic until artifacts and models are verified usable.

pub mod process;
pub mod readiness;
pub mod traits;

pub use process::{CommandEngine, CommandEngineConfig};
pub use readiness::ReadinessSequencer;
pub use traits::InferenceEngine;
