//! Volume primitives
//!
//! Pure building blocks shared by every provisioning strategy: capacity
//! quantization, the volume identity codec, parameter parsing, and the
//! in-flight operation registry.

pub mod capacity;
pub mod identity;
pub mod inflight;
pub mod parameters;

pub use capacity::{quantize_capacity_gib, DeploymentType, StorageType, TierSpec, GIB};
pub use identity::{SharedVolumeId, VolumeId, VOLUME_ID_DELIMITER};
pub use inflight::{InFlight, InFlightGuard, InFlightKey};
pub use parameters::{ProvisionerKind, VolumeParameters};
