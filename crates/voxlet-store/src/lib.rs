//! voxlet-store: Idempotent artifact provisioning onto a persistent volume
//!
//! Layout on the volume: one subdirectory per artifact name containing the
//! transferred content, a completion marker written only after a verified
//! transfer, and a transient lock file while provisioning is in flight.

pub mod cache;
pub mod fetch;
pub mod lock;

pub use cache::VolumeCache;
pub use fetch::{ArtifactFetcher, HttpFetcher};
pub use lock::ProvisionLock;
